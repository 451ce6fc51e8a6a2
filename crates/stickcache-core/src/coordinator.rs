//! Request handling: strategy dispatch, fetch deduplication and background
//! revalidation.
//!
//! Each request is classified, bound to the Active generation with a lease
//! and served according to its strategy. Origin fetches for the same
//! `(key, generation, strategy)` share one spawned task: callers await a
//! shared handle to it, so a caller going away never cancels the fetch or the
//! store write that follows it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::activation::ActivationController;
use crate::classifier::ResourceClassifier;
use crate::config::EngineConfig;
use crate::error::{CacheError, Result};
use crate::eviction::EvictionManager;
use crate::models::{Freshness, GenerationId, Request, Response, ResponseSource, Served, Strategy};
use crate::network::OriginClient;
use crate::store::{CacheEntry, CacheStore};
use crate::telemetry::{CacheEvent, DynEventSink};

type SharedFetch = Shared<BoxFuture<'static, Result<Response>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    key: String,
    generation: GenerationId,
    strategy: Strategy,
}

struct Flight {
    id: u64,
    future: SharedFetch,
}

/// Serving knobs taken from [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    pub max_age: HashMap<Strategy, Duration>,
    pub offline_fallback_key: Option<String>,
}

impl FetchSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_age: config
                .per_strategy_max_age_ms
                .iter()
                .map(|(strategy, ms)| (*strategy, Duration::from_millis(*ms)))
                .collect(),
            offline_fallback_key: config.offline_fallback_key.clone(),
        }
    }
}

struct CoordinatorInner {
    store: Arc<CacheStore>,
    eviction: Arc<EvictionManager>,
    client: OriginClient,
    classifier: ResourceClassifier,
    activation: Arc<ActivationController>,
    events: DynEventSink,
    settings: FetchSettings,
    flights: Mutex<HashMap<FlightKey, Flight>>,
    next_flight: AtomicU64,
}

/// Serves requests from the Active generation's partition and the origin.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FetchCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        eviction: Arc<EvictionManager>,
        client: OriginClient,
        classifier: ResourceClassifier,
        activation: Arc<ActivationController>,
        events: DynEventSink,
        settings: FetchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                eviction,
                client,
                classifier,
                activation,
                events,
                settings,
                flights: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    pub fn classifier(&self) -> &ResourceClassifier {
        &self.inner.classifier
    }

    /// Serve one request.
    ///
    /// A failed navigation with nothing cached for it is answered with the
    /// offline page when one is configured and cached.
    pub async fn handle_request(&self, request: &Request) -> Result<Served> {
        let strategy = self.inner.classifier.classify_request(request);
        let lease = self.inner.activation.acquire();
        let generation = lease.as_ref().map(|l| l.generation().clone());

        let result = match (strategy, generation.as_ref()) {
            (Strategy::NetworkOnly, _) => self.network_only(request, generation.clone()).await,
            (_, None) => self.uncached(request, strategy).await,
            (Strategy::CacheFirst, Some(gen)) => self.cache_first(request, gen).await,
            (Strategy::NetworkFirst, Some(gen)) => self.network_first(request, gen).await,
            (Strategy::StaleWhileRevalidate, Some(gen)) => {
                self.stale_while_revalidate(request, gen).await
            }
        };

        match result {
            Err(e) if request.is_navigation() => match self.offline_fallback(generation.as_ref(), strategy) {
                Some(served) => {
                    debug!(key = %request.key, error = %e, "Serving offline page");
                    Ok(served)
                }
                None => Err(e),
            },
            other => other,
        }
    }

    /// Keys of `generation` with an origin fetch in flight.
    pub fn busy_keys(&self, generation: &GenerationId) -> HashSet<String> {
        self.inner.busy_keys(generation)
    }

    /// Number of fetches currently in flight, across generations.
    pub fn inflight_count(&self) -> usize {
        self.inner.flights.lock().map(|f| f.len()).unwrap_or(0)
    }

    async fn cache_first(&self, request: &Request, gen: &GenerationId) -> Result<Served> {
        let strategy = Strategy::CacheFirst;
        if let Some(entry) = self.inner.store.access(gen, &request.key)? {
            return Ok(self.from_cache(entry, strategy, gen));
        }
        let response = self.inner.flight(request, gen, strategy, false)?.await?;
        Ok(from_network(response, strategy, Some(gen.clone())))
    }

    async fn network_first(&self, request: &Request, gen: &GenerationId) -> Result<Served> {
        let strategy = Strategy::NetworkFirst;
        match self.inner.flight(request, gen, strategy, false)?.await {
            Ok(response) => Ok(from_network(response, strategy, Some(gen.clone()))),
            Err(e) => match self.inner.store.access(gen, &request.key)? {
                Some(entry) => {
                    debug!(key = %request.key, error = %e, "Network failed, serving cached copy");
                    Ok(self.from_cache(entry, strategy, gen))
                }
                None => Err(e),
            },
        }
    }

    async fn stale_while_revalidate(&self, request: &Request, gen: &GenerationId) -> Result<Served> {
        let strategy = Strategy::StaleWhileRevalidate;
        if let Some(entry) = self.inner.store.access(gen, &request.key)? {
            // Detached: the spawned task outlives the handle we drop here.
            drop(self.inner.flight(request, gen, strategy, true)?);
            return Ok(self.from_cache(entry, strategy, gen));
        }
        let response = self.inner.flight(request, gen, strategy, false)?.await?;
        Ok(from_network(response, strategy, Some(gen.clone())))
    }

    async fn network_only(&self, request: &Request, generation: Option<GenerationId>) -> Result<Served> {
        let strategy = Strategy::NetworkOnly;
        match self.inner.client.fetch_passthrough(request).await {
            Ok(response) => Ok(from_network(response, strategy, generation)),
            Err(e) => {
                self.inner.fetch_failed(&request.key, strategy, &e, false);
                Err(e)
            }
        }
    }

    /// Before any generation is active nothing can be cached; fetch directly.
    async fn uncached(&self, request: &Request, strategy: Strategy) -> Result<Served> {
        match self
            .inner
            .client
            .fetch(request, strategy.retries_network())
            .await
        {
            Ok(response) => Ok(from_network(response, strategy, None)),
            Err(e) => {
                self.inner.fetch_failed(&request.key, strategy, &e, false);
                Err(e)
            }
        }
    }

    fn offline_fallback(&self, generation: Option<&GenerationId>, strategy: Strategy) -> Option<Served> {
        let key = self.inner.settings.offline_fallback_key.as_deref()?;
        let gen = generation?;
        let entry = self.inner.store.access(gen, key).ok().flatten()?;
        Some(Served {
            response: entry.payload,
            source: ResponseSource::OfflineFallback,
            freshness: Freshness::Stale,
            strategy,
            generation: Some(gen.clone()),
        })
    }

    fn from_cache(&self, entry: CacheEntry, strategy: Strategy, gen: &GenerationId) -> Served {
        let freshness = match self.inner.settings.max_age.get(&strategy) {
            Some(max_age) if entry.is_older_than(*max_age) => Freshness::Stale,
            _ => Freshness::Fresh,
        };
        Served {
            response: entry.payload,
            source: ResponseSource::Cache,
            freshness,
            strategy,
            generation: Some(gen.clone()),
        }
    }
}

fn from_network(response: Response, strategy: Strategy, generation: Option<GenerationId>) -> Served {
    Served {
        response,
        source: ResponseSource::Network,
        freshness: Freshness::Fresh,
        strategy,
        generation,
    }
}

impl CoordinatorInner {
    /// Join the in-flight fetch for this key, or start one.
    fn flight(
        self: &Arc<Self>,
        request: &Request,
        gen: &GenerationId,
        strategy: Strategy,
        background: bool,
    ) -> Result<SharedFetch> {
        let flight_key = FlightKey {
            key: request.key.clone(),
            generation: gen.clone(),
            strategy,
        };

        let mut flights = self
            .flights
            .lock()
            .map_err(|e| CacheError::Internal(format!("flight table poisoned: {}", e)))?;
        if let Some(flight) = flights.get(&flight_key) {
            debug!(key = %request.key, "Joining in-flight fetch");
            return Ok(flight.future.clone());
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        let task_request = request.clone();
        let task_key = flight_key.clone();

        // The table lock is held until the flight is registered, so the task
        // cannot unregister itself before it is inserted.
        let task = tokio::spawn(async move {
            let result = inner
                .run_fetch(&task_request, &task_key.generation, strategy, background)
                .await;
            inner.finish_flight(&task_key, id);
            result
        });

        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::Internal(format!("fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        flights.insert(
            flight_key,
            Flight {
                id,
                future: future.clone(),
            },
        );
        Ok(future)
    }

    async fn run_fetch(
        &self,
        request: &Request,
        gen: &GenerationId,
        strategy: Strategy,
        background: bool,
    ) -> Result<Response> {
        let retry = !background && strategy.retries_network();
        match self.client.fetch(request, retry).await {
            Ok(response) => {
                self.store_response(request, gen, strategy, &response);
                Ok(response)
            }
            Err(e) => {
                self.fetch_failed(&request.key, strategy, &e, background);
                Err(e)
            }
        }
    }

    /// Write a fetched response. Failures here never reach the caller.
    fn store_response(&self, request: &Request, gen: &GenerationId, strategy: Strategy, response: &Response) {
        if !strategy.is_cacheable() || !response.is_cacheable() {
            debug!(key = %request.key, status = response.status, "Not caching non-200 response");
            return;
        }

        let mut entry = CacheEntry::new(request.key.clone(), response.clone(), strategy);
        if self.is_critical(gen, &request.key) {
            // Critical resources re-fetched after a restore stay pinned.
            entry = entry.pinned();
        }
        match self.eviction.admit(gen, entry, &self.busy_keys(gen)) {
            Ok(_) => {}
            Err(CacheError::GenerationNotFound(_)) => {
                debug!(key = %request.key, generation = %gen.short(), "Generation purged, discarding fetch result");
            }
            Err(e) => {
                warn!(key = %request.key, generation = %gen.short(), error = %e, "Failed to cache response");
            }
        }
    }

    fn is_critical(&self, gen: &GenerationId, key: &str) -> bool {
        self.activation
            .handle_of(gen)
            .is_some_and(|handle| handle.manifest().hash_of(key).is_some())
    }

    fn finish_flight(&self, flight_key: &FlightKey, id: u64) {
        if let Ok(mut flights) = self.flights.lock() {
            if flights.get(flight_key).is_some_and(|f| f.id == id) {
                flights.remove(flight_key);
            }
        }
    }

    fn busy_keys(&self, generation: &GenerationId) -> HashSet<String> {
        self.flights
            .lock()
            .map(|flights| {
                flights
                    .keys()
                    .filter(|k| &k.generation == generation)
                    .map(|k| k.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fetch_failed(&self, key: &str, strategy: Strategy, error: &CacheError, background: bool) {
        self.events.emit(CacheEvent::FetchFailed {
            key: key.to_string(),
            strategy,
            error: error.to_string(),
            background,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StrategyRule;
    use crate::eviction::EvictionPolicy;
    use crate::models::Method;
    use crate::network::RetryConfig;
    use crate::telemetry::MemoryEventSink;
    use crate::testing::ScriptedOrigin;
    use crate::version::Manifest;
    use chrono::{Duration as ChronoDuration, Utc};

    struct Fixture {
        store: Arc<CacheStore>,
        origin: Arc<ScriptedOrigin>,
        events: Arc<MemoryEventSink>,
        coordinator: FetchCoordinator,
        gen: GenerationId,
    }

    fn classifier() -> ResourceClassifier {
        ResourceClassifier::new(vec![
            StrategyRule::prefix("/static/", Strategy::CacheFirst),
            StrategyRule::exact("/index.html", Strategy::CacheFirst),
            StrategyRule::prefix("/live/", Strategy::NetworkFirst),
            StrategyRule::prefix("/api/", Strategy::StaleWhileRevalidate),
            StrategyRule::prefix("/stream/", Strategy::NetworkOnly),
        ])
    }

    fn fixture_with(quota: u64, activate: bool) -> Fixture {
        fixture_with_manifest(quota, activate.then(Manifest::default))
    }

    fn fixture_with_manifest(quota: u64, manifest: Option<Manifest>) -> Fixture {
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
            RetryConfig::new()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let activation = Arc::new(ActivationController::new(
            store.clone(),
            eviction.clone(),
            client.clone(),
            events.clone(),
            false,
        ));
        let gen = GenerationId::from("g1");
        if let Some(manifest) = manifest {
            activation.adopt(gen.clone(), manifest).unwrap();
        }

        let mut settings = FetchSettings::from_config(&EngineConfig::default());
        settings.offline_fallback_key = Some("/index.html".into());
        let coordinator = FetchCoordinator::new(
            store.clone(),
            eviction,
            client,
            classifier(),
            activation,
            events.clone(),
            settings,
        );
        Fixture {
            store,
            origin,
            events,
            coordinator,
            gen,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(1_000_000, true)
    }

    async fn wait_for_idle(coordinator: &FetchCoordinator) {
        for _ in 0..200 {
            if coordinator.inflight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fetches still in flight");
    }

    #[tokio::test]
    async fn test_cache_first_miss_then_hit() {
        let f = fixture();
        f.origin.respond("/static/app.css", Response::ok("body{}"));
        let request = Request::get("/static/app.css");

        let first = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(first.generation.as_ref(), Some(&f.gen));

        let second = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.body, "body{}");
        assert_eq!(f.origin.calls("/static/app.css"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_retries_once() {
        let f = fixture();
        f.origin.fail_next("/static/a.js", 1);
        f.origin.respond("/static/a.js", Response::ok("a"));

        let served = f
            .coordinator
            .handle_request(&Request::get("/static/a.js"))
            .await
            .unwrap();
        assert_eq!(served.response.body, "a");
        assert_eq!(f.origin.calls("/static/a.js"), 2);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let f = fixture();
        f.origin.respond("/live/jobs", Response::ok("v1"));
        let request = Request::get("/live/jobs");
        f.coordinator.handle_request(&request).await.unwrap();

        f.origin.fail_next("/live/jobs", 10);
        let served = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.body, "v1");
        assert!(f.events.count("fetch_failed") >= 1);
    }

    #[tokio::test]
    async fn test_network_first_miss_and_failure_is_error() {
        let f = fixture();
        f.origin.fail_next("/live/none", 10);
        let err = f
            .coordinator
            .handle_request(&Request::get("/live/none"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_offline_page() {
        let f = fixture();
        f.origin.respond("/index.html", Response::ok("<shell>"));
        f.coordinator
            .handle_request(&Request::get("/index.html"))
            .await
            .unwrap();

        f.origin.fail_next("/live/report", 10);
        let served = f
            .coordinator
            .handle_request(&Request::navigate("/live/report"))
            .await
            .unwrap();
        assert_eq!(served.source, ResponseSource::OfflineFallback);
        assert_eq!(served.response.body, "<shell>");

        f.origin.fail_next("/live/data", 10);
        assert!(f
            .coordinator
            .handle_request(&Request::get("/live/data"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_swr_serves_cached_then_refreshes() {
        let f = fixture();
        f.origin.respond("/api/rates", Response::ok("v1"));
        let request = Request::get("/api/rates");
        f.coordinator.handle_request(&request).await.unwrap();

        f.origin.respond("/api/rates", Response::ok("v2"));
        let served = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.body, "v1");

        wait_for_idle(&f.coordinator).await;
        let stored = f.store.get(&f.gen, "/api/rates").unwrap().unwrap();
        assert_eq!(stored.payload.body, "v2");
        assert_eq!(f.origin.calls("/api/rates"), 2);
    }

    #[tokio::test]
    async fn test_swr_background_failure_keeps_cached_copy() {
        let f = fixture();
        f.origin.respond("/api/rates", Response::ok("v1"));
        let request = Request::get("/api/rates");
        f.coordinator.handle_request(&request).await.unwrap();

        f.origin.fail_next("/api/rates", 1);
        let served = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(served.response.body, "v1");

        wait_for_idle(&f.coordinator).await;
        assert_eq!(f.origin.calls("/api/rates"), 2);
        assert_eq!(f.store.get(&f.gen, "/api/rates").unwrap().unwrap().payload.body, "v1");
        assert!(f.events.events().iter().any(|e| matches!(
            e,
            CacheEvent::FetchFailed { background: true, .. }
        )));
    }

    #[tokio::test]
    async fn test_swr_reports_stale_content() {
        let f = fixture();
        let mut entry = CacheEntry::new("/api/old", Response::ok("old"), Strategy::StaleWhileRevalidate);
        entry.inserted_at = Utc::now() - ChronoDuration::minutes(10);
        f.store.put(&f.gen, "/api/old", entry).unwrap();

        let served = f
            .coordinator
            .handle_request(&Request::get("/api/old"))
            .await
            .unwrap();
        assert_eq!(served.freshness, Freshness::Stale);
        wait_for_idle(&f.coordinator).await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let f = fixture();
        f.origin.set_delay(Duration::from_millis(50));
        f.origin.respond("/live/quote", Response::ok("q"));
        let request = Request::get("/live/quote");

        let calls = (0..10).map(|_| f.coordinator.handle_request(&request));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.as_ref().unwrap().response.body == "q"));
        assert_eq!(f.origin.calls("/live/quote"), 1);
        assert_eq!(f.coordinator.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_fetch() {
        let f = fixture();
        f.origin.set_delay(Duration::from_millis(20));
        f.origin.respond("/static/slow.js", Response::ok("slow"));

        let request = Request::get("/static/slow.js");
        let abandoned = tokio::time::timeout(
            Duration::from_millis(1),
            f.coordinator.handle_request(&request),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(f.coordinator.busy_keys(&f.gen).contains("/static/slow.js"));

        wait_for_idle(&f.coordinator).await;
        assert!(f.store.contains(&f.gen, "/static/slow.js").unwrap());
        assert_eq!(f.origin.calls("/static/slow.js"), 1);
    }

    #[tokio::test]
    async fn test_non_200_is_returned_but_not_stored() {
        let f = fixture();
        f.origin.respond("/static/gone.png", Response::new(404, "nope"));
        let served = f
            .coordinator
            .handle_request(&Request::get("/static/gone.png"))
            .await
            .unwrap();
        assert_eq!(served.response.status, 404);
        assert!(!f.store.contains(&f.gen, "/static/gone.png").unwrap());
    }

    #[tokio::test]
    async fn test_network_only_bypasses_store_and_dedup() {
        let f = fixture();
        f.origin.set_delay(Duration::from_millis(10));
        f.origin.respond("/stream/events", Response::ok("e"));
        let request = Request::get("/stream/events");

        let (a, b) = tokio::join!(
            f.coordinator.handle_request(&request),
            f.coordinator.handle_request(&request)
        );
        assert_eq!(a.unwrap().strategy, Strategy::NetworkOnly);
        assert!(b.is_ok());
        assert_eq!(f.origin.calls("/stream/events"), 2);
        assert!(!f.store.contains(&f.gen, "/stream/events").unwrap());
    }

    #[tokio::test]
    async fn test_mutation_is_never_cached() {
        let f = fixture();
        f.origin.respond("/api/quotes", Response::ok("created"));
        let served = f
            .coordinator
            .handle_request(&Request::new(Method::Post, "/api/quotes"))
            .await
            .unwrap();
        assert_eq!(served.strategy, Strategy::NetworkOnly);
        assert!(!f.store.contains(&f.gen, "/api/quotes").unwrap());
    }

    #[tokio::test]
    async fn test_quota_exceeded_still_returns_value() {
        let f = fixture_with(50, true);
        f.origin.respond("/static/huge.bin", Response::ok(vec![1u8; 200]));
        let served = f
            .coordinator
            .handle_request(&Request::get("/static/huge.bin"))
            .await
            .unwrap();
        assert_eq!(served.response.body.len(), 200);
        assert_eq!(f.store.size(&f.gen).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_active_generation_fetches_uncached() {
        let f = fixture_with(1_000_000, false);
        f.origin.respond("/static/a.js", Response::ok("a"));
        let served = f
            .coordinator
            .handle_request(&Request::get("/static/a.js"))
            .await
            .unwrap();
        assert_eq!(served.source, ResponseSource::Network);
        assert!(served.generation.is_none());
        assert!(!f.store.has_generation(&f.gen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_serves_cached_copy() {
        let f = fixture();
        f.origin.respond("/live/rates", Response::ok("v1"));
        let request = Request::get("/live/rates");
        f.coordinator.handle_request(&request).await.unwrap();

        f.origin.set_delay(Duration::from_secs(5));
        let served = f.coordinator.handle_request(&request).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.body, "v1");
        // One initial fetch, then two timed-out attempts.
        assert_eq!(f.origin.calls("/live/rates"), 3);
        assert!(f.events.events().iter().any(|e| matches!(
            e,
            CacheEvent::FetchFailed { background: false, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_without_copy_is_timeout_error() {
        let f = fixture();
        f.origin.set_delay(Duration::from_secs(5));
        f.origin.respond("/live/none", Response::ok("late"));

        let err = f
            .coordinator
            .handle_request(&Request::get("/live/none"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout(t) if t == Duration::from_secs(1)));
        assert!(!f.store.contains(&f.gen, "/live/none").unwrap());
    }

    #[tokio::test]
    async fn test_manifest_resources_are_stored_pinned() {
        let manifest = Manifest::from_pairs([("/static/app.js", "h1")]);
        let f = fixture_with_manifest(600, Some(manifest));
        f.origin.respond("/static/app.js", Response::ok(vec![b'a'; 200]));
        f.coordinator
            .handle_request(&Request::get("/static/app.js"))
            .await
            .unwrap();

        for i in 0..5 {
            let key = format!("/static/photo{i}.png");
            f.origin.respond(&key, Response::ok(vec![b'p'; 200]));
            f.coordinator.handle_request(&Request::get(&key)).await.unwrap();
        }

        let shell = f.store.get(&f.gen, "/static/app.js").unwrap().unwrap();
        assert!(shell.pinned);
        assert!(!f.store.get(&f.gen, "/static/photo4.png").unwrap().unwrap().pinned);
        assert!(f.store.size(&f.gen).unwrap() <= 600);
    }
}
