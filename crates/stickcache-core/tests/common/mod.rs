//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stickcache_core::{
    CacheEngine, CacheError, DynVersionStore, EngineConfig, Manifest, MemoryEventSink, Origin,
    Request, Response, Result,
};

/// In-memory origin with call counting and an offline switch.
#[derive(Default)]
pub struct MockOrigin {
    responses: Mutex<HashMap<String, Response>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
    offline: AtomicBool,
}

impl MockOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, key: &str, body: impl Into<bytes::Bytes>) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), Response::ok(body));
    }

    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for MockOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.key.clone())
            .or_insert(0) += 1;

        let delay = self.delays.lock().unwrap().get(&request.key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::network("origin unreachable"));
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&request.key)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

/// Critical resources of the quote engine shell used across tests.
pub fn shell_manifest(version: &str) -> Manifest {
    Manifest::from_pairs([
        ("/index.html".to_string(), format!("index-{version}")),
        ("/app.js".to_string(), format!("app-{version}")),
        ("/app.css".to_string(), "css-stable".to_string()),
    ])
}

pub fn serve_shell(origin: &MockOrigin, version: &str) {
    origin.serve("/index.html", format!("<html data-version=\"{version}\">"));
    origin.serve("/app.js", format!("console.log('{version}')"));
    origin.serve("/app.css", "body { margin: 0 }");
}

pub struct TestEngine {
    pub engine: CacheEngine,
    pub origin: Arc<MockOrigin>,
    pub events: Arc<MemoryEventSink>,
}

pub fn build_engine(config: EngineConfig, versions: Option<DynVersionStore>) -> TestEngine {
    build_engine_with_origin(MockOrigin::new(), config, versions)
}

pub fn build_engine_with_origin(
    origin: Arc<MockOrigin>,
    config: EngineConfig,
    versions: Option<DynVersionStore>,
) -> TestEngine {
    let events = Arc::new(MemoryEventSink::new());
    let mut builder = CacheEngine::builder()
        .config(config.with_retry_base_delay(Duration::from_millis(1)))
        .origin(origin.clone())
        .event_sink(events.clone());
    if let Some(versions) = versions {
        builder = builder.version_store(versions);
    }
    TestEngine {
        engine: builder.build().expect("engine builds"),
        origin,
        events,
    }
}
