//! Cache entry and partition statistics types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GenerationId, Response, Strategy};

/// A cached response with its accounting metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key the entry is stored under.
    pub key: String,
    /// The cached response.
    pub payload: Response,
    /// Bytes charged against the partition quota (key + headers + body).
    pub size_bytes: u64,
    /// When the entry was written.
    pub inserted_at: DateTime<Utc>,
    /// When the entry was last read or written.
    pub last_accessed_at: DateTime<Utc>,
    /// Partition-local access counter; orders accesses with equal timestamps.
    pub access_seq: u64,
    /// Strategy the entry was fetched under.
    pub strategy: Strategy,
    /// Pinned entries are never evicted automatically.
    pub pinned: bool,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Response, strategy: Strategy) -> Self {
        let key = key.into();
        let now = Utc::now();
        Self {
            size_bytes: key.len() as u64 + payload.payload_size(),
            key,
            payload,
            inserted_at: now,
            last_accessed_at: now,
            access_seq: 0,
            strategy,
            pinned: false,
        }
    }

    /// Mark the entry as a pinned critical resource.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Time since the entry was written; zero under clock skew.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.inserted_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub(crate) fn recompute_size(&mut self) {
        self.size_bytes = self.key.len() as u64 + self.payload.payload_size();
    }
}

/// Size and count summary of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub generation: GenerationId,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub pinned_count: usize,
    pub pinned_bytes: u64,
}
