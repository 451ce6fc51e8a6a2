//! Stickcache Core - versioned offline resource cache.
//!
//! The engine sits between an application and its origin. Each request is
//! classified into a caching strategy (cache-first, network-first,
//! stale-while-revalidate or network-only) and served from the partition of
//! the Active generation. Concurrent fetches for one resource are
//! deduplicated, partitions are kept under a byte quota by LRU eviction that
//! never touches pinned critical resources, and a changed manifest installs
//! a new generation that takes over only once fully populated.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stickcache_core::{CacheEngine, Manifest, Request};
//!
//! #[tokio::main]
//! async fn main() -> stickcache_core::Result<()> {
//!     let engine = CacheEngine::builder().origin(Arc::new(MyOrigin)).build()?;
//!
//!     let manifest = Manifest::from_pairs([("/index.html", "3f2a"), ("/app.js", "9c1d")]);
//!     engine.startup(manifest).await?;
//!
//!     let served = engine.handle_request(&Request::get("/api/rates")).await?;
//!     println!("{} bytes from {:?}", served.response.body.len(), served.source);
//!     Ok(())
//! }
//! ```

pub mod activation;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod models;
pub mod network;
pub mod store;
pub mod telemetry;
pub mod version;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use activation::{ActivationController, GenerationHandle, GenerationLease, GenerationState};
pub use classifier::{KeyPattern, PatternKind, ResourceClassifier, RuleConfig, StrategyRule};
pub use config::{CacheDefaults, EngineConfig};
pub use coordinator::{FetchCoordinator, FetchSettings};
pub use engine::{CacheEngine, CacheEngineBuilder, CacheStats, GenerationStats};
pub use error::{CacheError, Result};
pub use eviction::{EvictionManager, EvictionPolicy, EvictionReport, QuotaLevel, QuotaUsage, StoreCheck};
pub use models::{
    Freshness, GenerationId, Method, Request, RequestMode, Response, ResponseSource, Served,
    Strategy,
};
pub use network::{DynOrigin, Origin, OriginClient, RetryConfig};
pub use store::{CacheEntry, CacheStore, PartitionStats, PartitionWriter, PutOutcome};
pub use telemetry::{CacheEvent, DynEventSink, EventSink, MemoryEventSink, TracingEventSink};
pub use version::{
    DynVersionStore, JsonFileVersionStore, Manifest, ManifestEntry, MemoryVersionStore,
    StartupOutcome, VersionManager, VersionRecord, VersionStore,
};
