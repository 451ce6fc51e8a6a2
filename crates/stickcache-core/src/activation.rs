//! Generation lifecycle and the routing pointer.
//!
//! A generation moves through:
//! - INSTALLING: critical resources fetched and pinned into its partition
//! - WAITING: installed, waiting for the previous generation to drain
//! - ACTIVATING: the routing pointer is being swapped
//! - ACTIVE: serving new requests
//! - RETIRING: replaced, finishing the requests still bound to it
//! - PURGED: partition released
//!
//! An install failure moves INSTALLING straight to PURGED. Requests hold a
//! [`GenerationLease`] on the generation they were dispatched to; the last
//! lease released on a RETIRING generation purges it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::eviction::EvictionManager;
use crate::models::{GenerationId, Request, Strategy};
use crate::network::OriginClient;
use crate::store::{CacheEntry, CacheStore};
use crate::telemetry::{CacheEvent, DynEventSink};
use crate::version::Manifest;

/// Lifecycle state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Installing,
    Waiting,
    Activating,
    Active,
    Retiring,
    Purged,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Installing => "installing",
            GenerationState::Waiting => "waiting",
            GenerationState::Activating => "activating",
            GenerationState::Active => "active",
            GenerationState::Retiring => "retiring",
            GenerationState::Purged => "purged",
        }
    }

    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Installing, Waiting)
                | (Installing, Purged)
                | (Waiting, Activating)
                | (Activating, Active)
                | (Active, Retiring)
                | (Retiring, Purged)
        )
    }

    /// States in which the generation owns a partition.
    pub fn is_live(&self) -> bool {
        !matches!(self, GenerationState::Purged)
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One generation: its manifest, lifecycle state and lease count.
pub struct GenerationHandle {
    id: GenerationId,
    manifest: Manifest,
    created_at: DateTime<Utc>,
    state: Mutex<GenerationState>,
    /// Requests currently bound to this generation.
    inflight: AtomicUsize,
    drained: Notify,
    activation_requested: AtomicBool,
    activation_signal: Notify,
}

impl GenerationHandle {
    fn new(id: GenerationId, manifest: Manifest, state: GenerationState) -> Self {
        Self {
            id,
            manifest,
            created_at: Utc::now(),
            state: Mutex::new(state),
            inflight: AtomicUsize::new(0),
            drained: Notify::new(),
            activation_requested: AtomicBool::new(false),
            activation_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> &GenerationId {
        &self.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> GenerationState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(GenerationState::Purged)
    }

    /// Number of leases currently held.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GenerationState>> {
        self.state
            .lock()
            .map_err(|e| CacheError::Internal(format!("generation state lock poisoned: {}", e)))
    }

    fn transition(&self, next: GenerationState) -> Result<GenerationState> {
        let mut state = self.lock_state()?;
        self.transition_locked(&mut state, next)
    }

    fn transition_locked(
        &self,
        state: &mut GenerationState,
        next: GenerationState,
    ) -> Result<GenerationState> {
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(CacheError::InvalidTransition {
                generation: self.id.clone(),
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        *state = next;
        debug!(generation = %self.id.short(), from = %from, to = %next, "Generation transition");
        Ok(from)
    }
}

impl std::fmt::Debug for GenerationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("inflight", &self.inflight())
            .finish()
    }
}

/// Counted reference to the generation a request was dispatched to.
///
/// The generation's partition stays live while any lease exists.
pub struct GenerationLease {
    handle: Arc<GenerationHandle>,
    controller: Arc<ActivationController>,
}

impl GenerationLease {
    pub fn generation(&self) -> &GenerationId {
        &self.handle.id
    }

    pub fn handle(&self) -> &Arc<GenerationHandle> {
        &self.handle
    }
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        if self.handle.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.handle.drained.notify_waiters();
            self.controller.try_purge(&self.handle);
        }
    }
}

/// Owns the routing pointer and drives generations through their states.
pub struct ActivationController {
    store: Arc<CacheStore>,
    eviction: Arc<EvictionManager>,
    client: OriginClient,
    events: DynEventSink,
    skip_waiting: bool,
    current: ArcSwapOption<GenerationHandle>,
    generations: RwLock<HashMap<GenerationId, Arc<GenerationHandle>>>,
    pending: Mutex<Option<Arc<GenerationHandle>>>,
}

impl ActivationController {
    pub fn new(
        store: Arc<CacheStore>,
        eviction: Arc<EvictionManager>,
        client: OriginClient,
        events: DynEventSink,
        skip_waiting: bool,
    ) -> Self {
        Self {
            store,
            eviction,
            client,
            events,
            skip_waiting,
            current: ArcSwapOption::empty(),
            generations: RwLock::new(HashMap::new()),
            pending: Mutex::new(None),
        }
    }

    /// The Active generation, if any.
    pub fn current(&self) -> Option<Arc<GenerationHandle>> {
        self.current.load_full()
    }

    pub fn current_generation(&self) -> Option<GenerationId> {
        self.current.load().as_ref().map(|h| h.id.clone())
    }

    /// State of a generation that still owns a partition.
    pub fn state_of(&self, generation: &GenerationId) -> Option<GenerationState> {
        self.generations
            .read()
            .ok()?
            .get(generation)
            .map(|h| h.state())
    }

    /// Handle of a generation that has not been purged.
    pub fn handle_of(&self, generation: &GenerationId) -> Option<Arc<GenerationHandle>> {
        self.generations.read().ok()?.get(generation).cloned()
    }

    /// Every generation that has not been purged.
    pub fn generations(&self) -> Vec<Arc<GenerationHandle>> {
        self.generations
            .read()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The generation currently installing or waiting, if any.
    pub fn pending(&self) -> Option<Arc<GenerationHandle>> {
        self.pending.lock().ok().and_then(|p| p.clone())
    }

    /// Bind a request to the Active generation.
    ///
    /// Returns `None` when no generation is active.
    pub fn acquire(self: &Arc<Self>) -> Option<GenerationLease> {
        loop {
            let handle = self.current.load_full()?;
            handle.inflight.fetch_add(1, Ordering::SeqCst);

            // The count is visible before the state check; a concurrent purge
            // either sees it and backs off, or has already marked the handle.
            let purged = handle
                .state
                .lock()
                .map(|s| *s == GenerationState::Purged)
                .unwrap_or(true);
            if !purged {
                return Some(GenerationLease {
                    handle,
                    controller: Arc::clone(self),
                });
            }
            handle.inflight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Request activation of the pending generation without waiting for the
    /// previous one to drain. Accepted while it is installing or waiting.
    pub fn signal_activation(&self) -> bool {
        let Some(pending) = self.pending() else {
            return false;
        };
        match pending.state() {
            GenerationState::Installing | GenerationState::Waiting => {
                pending.activation_requested.store(true, Ordering::SeqCst);
                pending.activation_signal.notify_waiters();
                info!(generation = %pending.id.short(), "Activation signal received");
                true
            }
            _ => false,
        }
    }

    /// Open the partition for a new generation in the Installing state.
    pub fn begin_install(
        &self,
        generation: GenerationId,
        manifest: Manifest,
    ) -> Result<Arc<GenerationHandle>> {
        if let Some(existing) = self.registered(&generation) {
            return Err(CacheError::InvalidTransition {
                generation,
                from: existing.state().to_string(),
                to: GenerationState::Installing.to_string(),
            });
        }

        self.store.create_partition(&generation)?;
        let handle = Arc::new(GenerationHandle::new(
            generation.clone(),
            manifest,
            GenerationState::Installing,
        ));
        self.register(&handle)?;
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(handle.clone());
        }
        Ok(handle)
    }

    /// Fetch and pin every critical resource of an Installing generation.
    ///
    /// Any failure aborts the install: the partition is dropped, the
    /// generation purged, and the Active generation left untouched.
    pub async fn install(&self, handle: &Arc<GenerationHandle>) -> Result<()> {
        let previous = self.current();
        for item in handle.manifest.entries() {
            if let Err(cause) = self.install_one(handle, previous.as_deref(), &item.key).await {
                self.abort(handle, &cause);
                return Err(CacheError::ActivationAborted {
                    generation: handle.id.clone(),
                    reason: Box::new(cause),
                });
            }
        }
        info!(
            generation = %handle.id.short(),
            critical_resources = handle.manifest.len(),
            "Install complete"
        );
        Ok(())
    }

    async fn install_one(
        &self,
        handle: &GenerationHandle,
        previous: Option<&GenerationHandle>,
        key: &str,
    ) -> Result<()> {
        let no_protection = HashSet::new();

        if let Some(entry) = self.carry_over(handle, previous, key) {
            debug!(generation = %handle.id.short(), key, "Carrying over unchanged resource");
            return self
                .eviction
                .admit(&handle.id, entry, &no_protection)
                .map(|_| ())
                .map_err(|e| manifest_error(key, &e));
        }

        let response = self
            .client
            .fetch(&Request::get(key), true)
            .await
            .map_err(|e| manifest_error(key, &e))?;
        if !response.is_cacheable() {
            return Err(CacheError::ManifestFetch {
                key: key.to_string(),
                message: format!("unexpected status {}", response.status),
            });
        }

        let entry = CacheEntry::new(key, response, Strategy::CacheFirst).pinned();
        self.eviction
            .admit(&handle.id, entry, &no_protection)
            .map(|_| ())
            .map_err(|e| manifest_error(key, &e))
    }

    /// A pinned copy from the previous generation when the key's hash is
    /// unchanged between the two manifests.
    fn carry_over(
        &self,
        handle: &GenerationHandle,
        previous: Option<&GenerationHandle>,
        key: &str,
    ) -> Option<CacheEntry> {
        let previous = previous?;
        let expected = handle.manifest.hash_of(key)?;
        if previous.manifest.hash_of(key)? != expected {
            return None;
        }
        self.store
            .get(&previous.id, key)
            .ok()
            .flatten()
            .filter(|e| e.pinned)
    }

    fn abort(&self, handle: &Arc<GenerationHandle>, cause: &CacheError) {
        if let Err(e) = handle.transition(GenerationState::Purged) {
            warn!(generation = %handle.id.short(), error = %e, "Abort from unexpected state");
        }
        if let Err(e) = self.store.drop_generation(&handle.id) {
            warn!(generation = %handle.id.short(), error = %e, "Failed to drop aborted partition");
        }
        self.unregister(&handle.id);
        self.clear_pending(handle);

        self.events.emit(CacheEvent::InstallAborted {
            generation: handle.id.clone(),
            reason: cause.to_string(),
        });
        self.events.emit(CacheEvent::GenerationPurged {
            generation: handle.id.clone(),
        });
    }

    /// Wait for the previous generation to drain (or an activation signal),
    /// then swap the routing pointer. Returns the generation it replaced.
    pub async fn activate(&self, handle: &Arc<GenerationHandle>) -> Result<Option<GenerationId>> {
        handle.transition(GenerationState::Waiting)?;
        self.wait_for_drain(handle).await;

        handle.transition(GenerationState::Activating)?;
        let previous = self.current.swap(Some(handle.clone()));
        handle.transition(GenerationState::Active)?;
        self.clear_pending(handle);

        let previous_id = previous.as_ref().map(|p| p.id.clone());
        if let Some(previous) = previous {
            previous.transition(GenerationState::Retiring)?;
            self.try_purge(&previous);
        }

        self.events.emit(CacheEvent::ActivationCommitted {
            generation: handle.id.clone(),
            previous: previous_id.clone(),
        });
        Ok(previous_id)
    }

    async fn wait_for_drain(&self, handle: &GenerationHandle) {
        if self.skip_waiting {
            return;
        }
        let Some(previous) = self.current() else {
            return;
        };

        loop {
            let drained = previous.drained.notified();
            let signalled = handle.activation_signal.notified();
            tokio::pin!(drained);
            tokio::pin!(signalled);
            drained.as_mut().enable();
            signalled.as_mut().enable();

            if previous.inflight() == 0 {
                return;
            }
            if handle.activation_requested.load(Ordering::SeqCst) {
                debug!(generation = %handle.id.short(), "Activating without drain");
                return;
            }

            tokio::select! {
                _ = &mut drained => {}
                _ = &mut signalled => {}
            }
        }
    }

    /// Make a generation Active without installing it, for a restart whose
    /// manifest matches the persisted generation.
    pub fn adopt(&self, generation: GenerationId, manifest: Manifest) -> Result<Arc<GenerationHandle>> {
        if let Some(current) = self.current() {
            return Err(CacheError::InvalidTransition {
                generation,
                from: format!("current {}", current.id),
                to: GenerationState::Active.to_string(),
            });
        }

        self.store.create_partition(&generation)?;
        let handle = Arc::new(GenerationHandle::new(
            generation,
            manifest,
            GenerationState::Active,
        ));
        self.register(&handle)?;
        self.current.store(Some(handle.clone()));
        Ok(handle)
    }

    /// Purge a Retiring generation once nothing is bound to it.
    fn try_purge(&self, handle: &GenerationHandle) {
        {
            let Ok(mut state) = handle.lock_state() else {
                return;
            };
            if *state != GenerationState::Retiring || handle.inflight() > 0 {
                return;
            }
            if handle
                .transition_locked(&mut state, GenerationState::Purged)
                .is_err()
            {
                return;
            }
        }

        if let Err(e) = self.store.drop_generation(&handle.id) {
            warn!(generation = %handle.id.short(), error = %e, "Failed to drop retired partition");
        }
        self.unregister(&handle.id);
        self.events.emit(CacheEvent::GenerationPurged {
            generation: handle.id.clone(),
        });
    }

    fn registered(&self, generation: &GenerationId) -> Option<Arc<GenerationHandle>> {
        self.generations.read().ok()?.get(generation).cloned()
    }

    fn register(&self, handle: &Arc<GenerationHandle>) -> Result<()> {
        self.generations
            .write()
            .map_err(|e| CacheError::Internal(format!("generation registry poisoned: {}", e)))?
            .insert(handle.id.clone(), handle.clone());
        Ok(())
    }

    fn unregister(&self, generation: &GenerationId) {
        if let Ok(mut generations) = self.generations.write() {
            generations.remove(generation);
        }
    }

    fn clear_pending(&self, handle: &GenerationHandle) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending.as_ref().is_some_and(|p| p.id == handle.id) {
                *pending = None;
            }
        }
    }
}

fn manifest_error(key: &str, cause: &CacheError) -> CacheError {
    match cause {
        CacheError::ManifestFetch { .. } => cause.clone(),
        other => CacheError::ManifestFetch {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionPolicy;
    use crate::models::Response;
    use crate::network::RetryConfig;
    use crate::telemetry::MemoryEventSink;
    use crate::testing::ScriptedOrigin;
    use std::time::Duration;

    struct Fixture {
        store: Arc<CacheStore>,
        origin: Arc<ScriptedOrigin>,
        events: Arc<MemoryEventSink>,
        controller: Arc<ActivationController>,
    }

    fn fixture(quota: u64, skip_waiting: bool) -> Fixture {
        let store = Arc::new(CacheStore::new());
        let origin = Arc::new(ScriptedOrigin::new());
        let events = Arc::new(MemoryEventSink::new());
        let eviction = Arc::new(EvictionManager::new(
            store.clone(),
            EvictionPolicy {
                quota_bytes: quota,
                headroom_ratio: 0.0,
                warning_percent: 75.0,
                critical_percent: 90.0,
                max_entries: Default::default(),
            },
            events.clone(),
        ));
        let client = OriginClient::new(
            origin.clone(),
            Duration::from_secs(1),
            RetryConfig::no_retry(),
        );
        let controller = Arc::new(ActivationController::new(
            store.clone(),
            eviction,
            client,
            events.clone(),
            skip_waiting,
        ));
        Fixture {
            store,
            origin,
            events,
            controller,
        }
    }

    async fn install_and_activate(f: &Fixture, manifest: Manifest) -> Arc<GenerationHandle> {
        let handle = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        f.controller.install(&handle).await.unwrap();
        f.controller.activate(&handle).await.unwrap();
        handle
    }

    #[test]
    fn test_transition_table() {
        use GenerationState::*;
        assert!(Installing.can_transition_to(Waiting));
        assert!(Installing.can_transition_to(Purged));
        assert!(Retiring.can_transition_to(Purged));
        assert!(!Active.can_transition_to(Purged));
        assert!(!Waiting.can_transition_to(Active));
        assert!(!Purged.can_transition_to(Installing));
    }

    #[tokio::test]
    async fn test_install_pins_critical_resources() {
        let f = fixture(10_000, false);
        f.origin.respond("/index.html", Response::ok("<html>"));
        f.origin.respond("/app.js", Response::ok("app"));

        let manifest = Manifest::from_pairs([("/index.html", "h1"), ("/app.js", "h2")]);
        let handle = install_and_activate(&f, manifest).await;

        assert_eq!(handle.state(), GenerationState::Active);
        assert_eq!(f.controller.current_generation(), Some(handle.id().clone()));
        let stats = f.store.partition_stats(handle.id()).unwrap();
        assert_eq!(stats.pinned_count, 2);
        assert_eq!(f.events.count("activation_committed"), 1);
    }

    #[tokio::test]
    async fn test_failed_install_leaves_active_untouched() {
        let f = fixture(10_000, false);
        f.origin.respond("/index.html", Response::ok("v1"));
        let v1 = install_and_activate(&f, Manifest::from_pairs([("/index.html", "h1")])).await;

        f.origin.fail_next("/app.js", 1);
        let manifest = Manifest::from_pairs([("/index.html", "h2"), ("/app.js", "h3")]);
        let v2 = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        let err = f.controller.install(&v2).await.unwrap_err();

        match err {
            CacheError::ActivationAborted { generation, reason } => {
                assert_eq!(&generation, v2.id());
                assert!(matches!(*reason, CacheError::ManifestFetch { ref key, .. } if key == "/app.js"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(v2.state(), GenerationState::Purged);
        assert!(!f.store.has_generation(v2.id()));
        assert!(f.controller.state_of(v2.id()).is_none());
        assert_eq!(f.controller.current_generation(), Some(v1.id().clone()));
        assert_eq!(f.events.count("install_aborted"), 1);
    }

    #[tokio::test]
    async fn test_non_200_critical_resource_aborts() {
        let f = fixture(10_000, false);
        let manifest = Manifest::from_pairs([("/missing.js", "h")]);
        let handle = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        assert!(f.controller.install(&handle).await.is_err());
        assert!(f.controller.current_generation().is_none());
    }

    #[tokio::test]
    async fn test_quota_failure_aborts_install() {
        let f = fixture(20, false);
        f.origin.respond("/big.js", Response::ok(vec![0u8; 100]));
        let manifest = Manifest::from_pairs([("/big.js", "h")]);
        let handle = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        let err = f.controller.install(&handle).await.unwrap_err();
        let CacheError::ActivationAborted { reason, .. } = err else {
            panic!("expected abort");
        };
        assert!(matches!(*reason, CacheError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn test_unchanged_resources_are_carried_over() {
        let f = fixture(10_000, false);
        f.origin.respond("/index.html", Response::ok("shell"));
        f.origin.respond("/app.js", Response::ok("v1"));
        install_and_activate(
            &f,
            Manifest::from_pairs([("/index.html", "same"), ("/app.js", "a1")]),
        )
        .await;

        f.origin.respond("/app.js", Response::ok("v2"));
        let v2 = install_and_activate(
            &f,
            Manifest::from_pairs([("/index.html", "same"), ("/app.js", "a2")]),
        )
        .await;

        assert_eq!(f.origin.calls("/index.html"), 1);
        assert_eq!(f.origin.calls("/app.js"), 2);
        let carried = f.store.get(v2.id(), "/index.html").unwrap().unwrap();
        assert!(carried.pinned);
        assert_eq!(carried.payload.body, "shell");
    }

    #[tokio::test]
    async fn test_previous_generation_purged_after_drain() {
        let f = fixture(10_000, false);
        f.origin.respond("/", Response::ok("v1"));
        let v1 = install_and_activate(&f, Manifest::from_pairs([("/", "1")])).await;

        let lease = f.controller.acquire().unwrap();
        assert_eq!(lease.generation(), v1.id());

        let manifest = Manifest::from_pairs([("/", "2")]);
        let v2 = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        f.controller.install(&v2).await.unwrap();

        let controller = f.controller.clone();
        let v2_task = v2.clone();
        let activation = tokio::spawn(async move { controller.activate(&v2_task).await });

        tokio::task::yield_now().await;
        assert_eq!(v2.state(), GenerationState::Waiting);
        assert_eq!(f.controller.current_generation(), Some(v1.id().clone()));

        drop(lease);
        let previous = activation.await.unwrap().unwrap();
        assert_eq!(previous.as_ref(), Some(v1.id()));
        assert_eq!(v1.state(), GenerationState::Purged);
        assert!(!f.store.has_generation(v1.id()));
        assert_eq!(f.events.count("generation_purged"), 1);
    }

    #[tokio::test]
    async fn test_signal_activation_skips_drain_and_retires() {
        let f = fixture(10_000, false);
        f.origin.respond("/", Response::ok("v1"));
        let v1 = install_and_activate(&f, Manifest::from_pairs([("/", "1")])).await;
        let lease = f.controller.acquire().unwrap();

        let manifest = Manifest::from_pairs([("/", "2")]);
        let v2 = f
            .controller
            .begin_install(manifest.combined_hash(), manifest)
            .unwrap();
        assert!(f.controller.signal_activation());
        f.controller.install(&v2).await.unwrap();
        f.controller.activate(&v2).await.unwrap();

        assert_eq!(v1.state(), GenerationState::Retiring);
        assert!(f.store.has_generation(v1.id()));
        assert_eq!(f.controller.acquire().unwrap().generation(), v2.id());

        drop(lease);
        assert_eq!(v1.state(), GenerationState::Purged);
        assert!(!f.store.has_generation(v1.id()));
        assert!(!f.controller.signal_activation());
    }

    #[tokio::test]
    async fn test_skip_waiting_config() {
        let f = fixture(10_000, true);
        f.origin.respond("/", Response::ok("v1"));
        install_and_activate(&f, Manifest::from_pairs([("/", "1")])).await;
        let _lease = f.controller.acquire().unwrap();

        let v2 = install_and_activate(&f, Manifest::from_pairs([("/", "2")])).await;
        assert_eq!(f.controller.current_generation(), Some(v2.id().clone()));
    }

    #[tokio::test]
    async fn test_adopt_and_duplicate_install() {
        let f = fixture(10_000, false);
        let manifest = Manifest::from_pairs([("/", "1")]);
        let id = manifest.combined_hash();
        let handle = f.controller.adopt(id.clone(), manifest.clone()).unwrap();

        assert_eq!(handle.state(), GenerationState::Active);
        assert_eq!(f.controller.state_of(&id), Some(GenerationState::Active));
        assert!(matches!(
            f.controller.begin_install(id.clone(), manifest.clone()),
            Err(CacheError::InvalidTransition { .. })
        ));
        assert!(f.controller.adopt(id, manifest).is_err());
    }

    #[test]
    fn test_acquire_without_generation() {
        let f = fixture(10_000, false);
        assert!(f.controller.acquire().is_none());
    }
}
