//! Structured cache events for an external logging/telemetry collaborator.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::models::{GenerationId, Strategy};

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    GenerationCreated {
        generation: GenerationId,
        previous: Option<GenerationId>,
        critical_resources: usize,
    },
    ActivationCommitted {
        generation: GenerationId,
        previous: Option<GenerationId>,
    },
    EntryEvicted {
        generation: GenerationId,
        key: String,
        size_bytes: u64,
    },
    FetchFailed {
        key: String,
        strategy: Strategy,
        error: String,
        /// The failure happened in a detached revalidation.
        background: bool,
    },
    InstallAborted {
        generation: GenerationId,
        reason: String,
    },
    GenerationPurged {
        generation: GenerationId,
    },
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::GenerationCreated { .. } => "generation_created",
            CacheEvent::ActivationCommitted { .. } => "activation_committed",
            CacheEvent::EntryEvicted { .. } => "entry_evicted",
            CacheEvent::FetchFailed { .. } => "fetch_failed",
            CacheEvent::InstallAborted { .. } => "install_aborted",
            CacheEvent::GenerationPurged { .. } => "generation_purged",
        }
    }
}

/// Consumer of cache events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CacheEvent);
}

/// Shared handle to an event sink.
pub type DynEventSink = Arc<dyn EventSink>;

/// Default sink: one structured `tracing` event per cache event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: CacheEvent) {
        match &event {
            CacheEvent::GenerationCreated {
                generation,
                previous,
                critical_resources,
            } => info!(
                event = event.name(),
                generation = %generation.short(),
                previous = previous.as_ref().map(|p| p.short()).unwrap_or("none"),
                critical_resources,
                "Generation created"
            ),
            CacheEvent::ActivationCommitted {
                generation,
                previous,
            } => info!(
                event = event.name(),
                generation = %generation.short(),
                previous = previous.as_ref().map(|p| p.short()).unwrap_or("none"),
                "Activation committed"
            ),
            CacheEvent::EntryEvicted {
                generation,
                key,
                size_bytes,
            } => info!(
                event = event.name(),
                generation = %generation.short(),
                key = %key,
                size_bytes,
                "Entry evicted"
            ),
            CacheEvent::FetchFailed {
                key,
                strategy,
                error,
                background,
            } => warn!(
                event = event.name(),
                key = %key,
                strategy = strategy.as_str(),
                error = %error,
                background,
                "Fetch failed"
            ),
            CacheEvent::InstallAborted { generation, reason } => warn!(
                event = event.name(),
                generation = %generation.short(),
                reason = %reason,
                "Install aborted"
            ),
            CacheEvent::GenerationPurged { generation } => info!(
                event = event.name(),
                generation = %generation.short(),
                "Generation purged"
            ),
        }
    }
}

/// Sink that keeps every event in memory, for hosts that poll and for tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of recorded events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.name() == name).count())
            .unwrap_or(0)
    }

    pub fn drain(&self) -> Vec<CacheEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: CacheEvent) {
        TracingEventSink.emit(event.clone());
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
