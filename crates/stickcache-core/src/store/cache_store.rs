//! In-memory partitioned cache store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tracing::debug;

use super::entry::{CacheEntry, PartitionStats};
use crate::error::{CacheError, Result};
use crate::models::GenerationId;

/// Result of an upsert.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Signed change of the partition's byte total.
    pub delta: i64,
    /// The entry that was replaced, if any.
    pub previous: Option<CacheEntry>,
}

struct PartitionInner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    clock: u64,
    dropped: bool,
}

impl PartitionInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.total_bytes -= removed.size_bytes;
        Some(removed)
    }

    fn upsert(&mut self, key: &str, mut entry: CacheEntry) -> PutOutcome {
        if entry.key != key {
            entry.key = key.to_string();
            entry.recompute_size();
        }
        entry.last_accessed_at = Utc::now();
        entry.access_seq = self.tick();

        let size = entry.size_bytes;
        let previous = self.remove(key);
        self.total_bytes += size;
        self.entries.insert(key.to_string(), entry);

        let delta = size as i64 - previous.as_ref().map(|p| p.size_bytes as i64).unwrap_or(0);
        PutOutcome { delta, previous }
    }

    /// Reinsert an entry as it was, access metadata included.
    fn reinstate(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }
}

/// Exclusive handle on one partition, held for the duration of
/// [`CacheStore::update`].
pub struct PartitionWriter<'a> {
    inner: &'a mut PartitionInner,
}

impl PartitionWriter<'_> {
    /// Same as [`CacheStore::put`].
    pub fn put(&mut self, key: &str, entry: CacheEntry) -> PutOutcome {
        self.inner.upsert(key, entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.inner.remove(key)
    }

    /// Put back an entry taken out earlier in the same update, keeping its
    /// recency so it sorts where it did before.
    pub fn reinstate(&mut self, entry: CacheEntry) {
        self.inner.reinstate(entry);
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.inner.entries.values()
    }
}

/// Entries of one generation behind a single lock.
struct Partition {
    generation: GenerationId,
    inner: Mutex<PartitionInner>,
}

impl Partition {
    fn new(generation: GenerationId) -> Self {
        Self {
            generation,
            inner: Mutex::new(PartitionInner {
                entries: HashMap::new(),
                total_bytes: 0,
                clock: 0,
                dropped: false,
            }),
        }
    }

    /// Lock the partition, failing if it was dropped while the caller held a
    /// reference to it.
    fn lock(&self) -> Result<MutexGuard<'_, PartitionInner>> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| CacheError::Internal(format!("partition lock poisoned: {}", e)))?;
        if guard.dropped {
            return Err(CacheError::GenerationNotFound(self.generation.clone()));
        }
        Ok(guard)
    }
}

/// Partitioned key → entry store with size accounting.
///
/// The partition map is only read-locked for lookups; all entry operations
/// take the owning partition's mutex.
#[derive(Default)]
pub struct CacheStore {
    partitions: RwLock<HashMap<GenerationId, Arc<Partition>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, generation: &GenerationId) -> Result<Arc<Partition>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|e| CacheError::Internal(format!("store lock poisoned: {}", e)))?;
        partitions
            .get(generation)
            .cloned()
            .ok_or_else(|| CacheError::GenerationNotFound(generation.clone()))
    }

    /// Create an empty partition. Returns `false` if it already existed.
    pub fn create_partition(&self, generation: &GenerationId) -> Result<bool> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|e| CacheError::Internal(format!("store lock poisoned: {}", e)))?;
        if partitions.contains_key(generation) {
            return Ok(false);
        }
        partitions.insert(
            generation.clone(),
            Arc::new(Partition::new(generation.clone())),
        );
        debug!(generation = %generation.short(), "Created partition");
        Ok(true)
    }

    pub fn has_generation(&self, generation: &GenerationId) -> bool {
        self.partition(generation).is_ok()
    }

    /// Generations that currently own a partition.
    pub fn generations(&self) -> Vec<GenerationId> {
        self.partitions
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or replace `key`, returning the size delta.
    pub fn put(&self, generation: &GenerationId, key: &str, entry: CacheEntry) -> Result<PutOutcome> {
        let partition = self.partition(generation)?;
        let mut inner = partition.lock()?;
        Ok(inner.upsert(key, entry))
    }

    /// Run several operations on one partition under a single lock.
    ///
    /// Nothing else can read or write the partition until `f` returns, so a
    /// multi-step write (upsert, evict, roll back) is observed as one step.
    pub fn update<R>(
        &self,
        generation: &GenerationId,
        f: impl FnOnce(&mut PartitionWriter<'_>) -> Result<R>,
    ) -> Result<R> {
        let partition = self.partition(generation)?;
        let mut inner = partition.lock()?;
        f(&mut PartitionWriter { inner: &mut *inner })
    }

    /// Read an entry without touching its access metadata.
    pub fn get(&self, generation: &GenerationId, key: &str) -> Result<Option<CacheEntry>> {
        let partition = self.partition(generation)?;
        let inner = partition.lock()?;
        Ok(inner.entries.get(key).cloned())
    }

    /// Read an entry and mark it as most recently used.
    pub fn access(&self, generation: &GenerationId, key: &str) -> Result<Option<CacheEntry>> {
        let partition = self.partition(generation)?;
        let mut inner = partition.lock()?;
        let seq = inner.tick();
        Ok(inner.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = Utc::now();
            entry.access_seq = seq;
            entry.clone()
        }))
    }

    pub fn contains(&self, generation: &GenerationId, key: &str) -> Result<bool> {
        let partition = self.partition(generation)?;
        let inner = partition.lock()?;
        Ok(inner.entries.contains_key(key))
    }

    /// Remove one entry, returning it if present.
    pub fn delete(&self, generation: &GenerationId, key: &str) -> Result<Option<CacheEntry>> {
        let partition = self.partition(generation)?;
        let mut inner = partition.lock()?;
        Ok(inner.remove(key))
    }

    /// Snapshot of every entry in the partition.
    ///
    /// The returned vector is detached from the store, so callers may iterate
    /// it while other tasks keep writing.
    pub fn list(&self, generation: &GenerationId) -> Result<Vec<CacheEntry>> {
        let partition = self.partition(generation)?;
        let inner = partition.lock()?;
        Ok(inner.entries.values().cloned().collect())
    }

    /// Total bytes currently charged to the partition.
    pub fn size(&self, generation: &GenerationId) -> Result<u64> {
        let partition = self.partition(generation)?;
        let inner = partition.lock()?;
        Ok(inner.total_bytes)
    }

    pub fn partition_stats(&self, generation: &GenerationId) -> Result<PartitionStats> {
        let partition = self.partition(generation)?;
        let inner = partition.lock()?;
        let (pinned_count, pinned_bytes) = inner
            .entries
            .values()
            .filter(|e| e.pinned)
            .fold((0, 0), |(n, b), e| (n + 1, b + e.size_bytes));
        Ok(PartitionStats {
            generation: generation.clone(),
            entry_count: inner.entries.len(),
            total_bytes: inner.total_bytes,
            pinned_count,
            pinned_bytes,
        })
    }

    /// Remove every entry, pinned ones included. Returns the number removed.
    pub fn clear(&self, generation: &GenerationId) -> Result<usize> {
        let partition = self.partition(generation)?;
        let mut inner = partition.lock()?;
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.total_bytes = 0;
        Ok(removed)
    }

    /// Release a whole partition.
    ///
    /// Writers still holding the partition observe `GenerationNotFound` and
    /// their writes are discarded. Returns `false` if no partition existed.
    pub fn drop_generation(&self, generation: &GenerationId) -> Result<bool> {
        let removed = self
            .partitions
            .write()
            .map_err(|e| CacheError::Internal(format!("store lock poisoned: {}", e)))?
            .remove(generation);

        let Some(partition) = removed else {
            return Ok(false);
        };

        let mut inner = partition
            .inner
            .lock()
            .map_err(|e| CacheError::Internal(format!("partition lock poisoned: {}", e)))?;
        inner.dropped = true;
        inner.entries.clear();
        inner.total_bytes = 0;
        debug!(generation = %generation.short(), "Dropped partition");
        Ok(true)
    }
}
