//! The engine facade and its builder.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activation::{ActivationController, GenerationState};
use crate::classifier::ResourceClassifier;
use crate::config::EngineConfig;
use crate::coordinator::{FetchCoordinator, FetchSettings};
use crate::error::{CacheError, Result};
use crate::eviction::{EvictionManager, EvictionPolicy, EvictionReport, QuotaUsage};
use crate::models::{GenerationId, Request, Served};
use crate::network::{DynOrigin, OriginClient};
use crate::store::CacheStore;
use crate::telemetry::{DynEventSink, TracingEventSink};
use crate::version::{DynVersionStore, Manifest, MemoryVersionStore, StartupOutcome, VersionManager};

/// Builder for [`CacheEngine`].
///
/// # Example
///
/// ```rust,ignore
/// use stickcache_core::{CacheEngine, EngineConfig};
///
/// let engine = CacheEngine::builder()
///     .config(EngineConfig::default())
///     .origin(origin)
///     .build()?;
/// engine.startup(manifest).await?;
/// ```
#[derive(Default)]
pub struct CacheEngineBuilder {
    config: Option<EngineConfig>,
    origin: Option<DynOrigin>,
    versions: Option<DynVersionStore>,
    events: Option<DynEventSink>,
}

impl CacheEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: [`EngineConfig::default`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The network origin. Required.
    pub fn origin(mut self, origin: DynOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Where the current generation is persisted.
    ///
    /// Default: in-memory, so every process starts from scratch.
    pub fn version_store(mut self, versions: DynVersionStore) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Default: [`TracingEventSink`].
    pub fn event_sink(mut self, events: DynEventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<CacheEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let origin = self.origin.ok_or_else(|| CacheError::Config {
            message: "An origin is required".to_string(),
        })?;
        let versions = self
            .versions
            .unwrap_or_else(|| Arc::new(MemoryVersionStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));

        let classifier = ResourceClassifier::from_rule_configs(&config.rules)?;
        let store = Arc::new(CacheStore::new());
        let eviction = Arc::new(EvictionManager::new(
            store.clone(),
            EvictionPolicy::from_config(&config),
            events.clone(),
        ));
        let client = OriginClient::new(origin, config.request_timeout(), config.retry_config());
        let activation = Arc::new(ActivationController::new(
            store.clone(),
            eviction.clone(),
            client.clone(),
            events.clone(),
            config.skip_waiting,
        ));
        let coordinator = FetchCoordinator::new(
            store.clone(),
            eviction.clone(),
            client,
            classifier,
            activation.clone(),
            events.clone(),
            FetchSettings::from_config(&config),
        );
        let version_manager = VersionManager::new(versions, activation.clone(), events);

        debug!(
            quota_bytes = config.max_partition_bytes,
            rules = coordinator.classifier().rules().len(),
            "Cache engine built"
        );

        Ok(CacheEngine {
            inner: Arc::new(EngineInner {
                config,
                store,
                eviction,
                activation,
                coordinator,
                versions: version_manager,
            }),
        })
    }
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<CacheStore>,
    eviction: Arc<EvictionManager>,
    activation: Arc<ActivationController>,
    coordinator: FetchCoordinator,
    versions: VersionManager,
}

/// Per-generation line of [`CacheStats`].
#[derive(Debug, Clone, Serialize)]
pub struct GenerationStats {
    pub generation: GenerationId,
    pub state: GenerationState,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub pinned_count: usize,
    pub pinned_bytes: u64,
    /// Requests currently bound to the generation.
    pub leases: usize,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub active_generation: Option<GenerationId>,
    pub generations: Vec<GenerationStats>,
    pub inflight_fetches: usize,
    pub quota_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Versioned offline cache: request handling, quota enforcement and
/// generation lifecycle behind one handle.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn activation(&self) -> &Arc<ActivationController> {
        &self.inner.activation
    }

    pub fn current_generation(&self) -> Option<GenerationId> {
        self.inner.activation.current_generation()
    }

    /// Bring the cache in line with `manifest`, installing and activating a
    /// new generation when it changed.
    pub async fn startup(&self, manifest: Manifest) -> Result<StartupOutcome> {
        let outcome = self.inner.versions.startup(manifest).await?;
        info!(
            generation = %outcome.generation().short(),
            outcome = ?outcome,
            "Startup complete"
        );
        Ok(outcome)
    }

    pub async fn handle_request(&self, request: &Request) -> Result<Served> {
        self.inner.coordinator.handle_request(request).await
    }

    /// Let a waiting generation take over without draining the current one.
    pub fn signal_activation(&self) -> bool {
        self.inner.activation.signal_activation()
    }

    /// Enforce the quota on every live partition.
    pub fn sweep(&self) -> Vec<(GenerationId, EvictionReport)> {
        let generations: Vec<GenerationId> = self
            .inner
            .activation
            .generations()
            .iter()
            .map(|h| h.id().clone())
            .collect();
        let coordinator = &self.inner.coordinator;
        self.inner
            .eviction
            .sweep(&generations, |generation| coordinator.busy_keys(generation))
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is
    /// aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted: usize = engine.sweep().iter().map(|(_, r)| r.evicted.len()).sum();
                if evicted > 0 {
                    debug!(evicted, "Periodic sweep");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let mut generations: Vec<GenerationStats> = self
            .inner
            .activation
            .generations()
            .iter()
            .filter_map(|handle| {
                let stats = self.inner.store.partition_stats(handle.id()).ok()?;
                Some(GenerationStats {
                    generation: handle.id().clone(),
                    state: handle.state(),
                    entry_count: stats.entry_count,
                    total_bytes: stats.total_bytes,
                    pinned_count: stats.pinned_count,
                    pinned_bytes: stats.pinned_bytes,
                    leases: handle.inflight(),
                    created_at: handle.created_at(),
                })
            })
            .collect();
        generations.sort_by_key(|g| g.created_at);

        CacheStats {
            active_generation: self.current_generation(),
            generations,
            inflight_fetches: self.inner.coordinator.inflight_count(),
            quota_bytes: self.inner.eviction.policy().quota_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Quota usage of the Active generation.
    pub fn usage(&self) -> Result<Option<QuotaUsage>> {
        match self.current_generation() {
            Some(generation) => self.inner.eviction.usage(&generation).map(Some),
            None => Ok(None),
        }
    }

    /// Remove every cached entry, pinned ones included, and forget the
    /// persisted generation so the next process installs afresh.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for handle in self.inner.activation.generations() {
            match self.inner.store.clear(handle.id()) {
                Ok(n) => removed += n,
                Err(CacheError::GenerationNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if let Err(e) = self.inner.versions.version_store().clear() {
            warn!(error = %e, "Failed to clear version record");
        }
        info!(removed, "Cleared all cached entries");
        Ok(removed)
    }
}
