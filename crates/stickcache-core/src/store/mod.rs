//! Per-generation cache storage.
//!
//! Every generation owns one partition: a key → entry map with running size
//! accounting. Operations on a partition serialize on that partition's lock;
//! distinct partitions never contend with each other.

mod cache_store;
mod entry;

pub use cache_store::{CacheStore, PartitionWriter, PutOutcome};
pub use entry::{CacheEntry, PartitionStats};
