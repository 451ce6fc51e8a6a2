//! Quota enforcement for cache partitions.
//!
//! Eviction runs when a write pushes a partition past its quota, and on the
//! optional periodic sweep. Victims are unpinned entries not backing an
//! in-flight fetch, least recently used first, until the partition is back
//! under `quota × (1 − headroom)`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{CacheError, Result};
use crate::models::{GenerationId, Strategy};
use crate::store::{CacheEntry, CacheStore, PartitionWriter, PutOutcome};
use crate::telemetry::{CacheEvent, DynEventSink};

/// Quota and reporting thresholds.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    pub quota_bytes: u64,
    pub headroom_ratio: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    /// Entry-count caps per strategy.
    pub max_entries: HashMap<Strategy, usize>,
}

impl EvictionPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            quota_bytes: config.max_partition_bytes,
            headroom_ratio: config.eviction_headroom_ratio,
            warning_percent: config.quota_warning_percent,
            critical_percent: config.quota_critical_percent,
            max_entries: config.per_strategy_max_entries.clone(),
        }
    }

    /// Size an eviction pass shrinks the partition to.
    pub fn target_bytes(&self) -> u64 {
        (self.quota_bytes as f64 * (1.0 - self.headroom_ratio)).floor() as u64
    }
}

/// What one eviction pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
    pub size_after: u64,
}

/// Usage band of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    Ok,
    Warning,
    Critical,
}

/// Quota usage report for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub generation: GenerationId,
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub usage_percent: f64,
    pub entry_count: usize,
    pub level: QuotaLevel,
}

/// Whether a payload of a given size fits without eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCheck {
    pub can_store: bool,
    pub would_warn: bool,
    pub available_bytes: u64,
    pub needed_bytes: u64,
}

/// Enforces the partition quota against a [`CacheStore`].
pub struct EvictionManager {
    store: Arc<CacheStore>,
    policy: EvictionPolicy,
    events: DynEventSink,
}

impl EvictionManager {
    pub fn new(store: Arc<CacheStore>, policy: EvictionPolicy, events: DynEventSink) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Eviction candidates in eviction order.
    ///
    /// Pinned entries and keys in `protected` never appear.
    pub fn candidates(
        &self,
        generation: &GenerationId,
        protected: &HashSet<String>,
    ) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<CacheEntry> = self
            .store
            .list(generation)?
            .into_iter()
            .filter(|e| evictable(e, protected))
            .collect();
        entries.sort_by(lru_order);
        Ok(entries)
    }

    /// Evict if the partition is over quota or a strategy is over its entry
    /// cap. A partition within both limits is left alone.
    pub fn enforce(
        &self,
        generation: &GenerationId,
        protected: &HashSet<String>,
    ) -> Result<EvictionReport> {
        let quota = self.policy.quota_bytes;
        let (victims, size_after) = self.store.update(generation, |part| {
            let mut victims = Vec::new();
            for strategy in self.policy.max_entries.keys() {
                victims.extend(self.trim_strategy_locked(part, *strategy, protected));
            }
            if part.total_bytes() > quota {
                victims.extend(self.evict_locked(part, protected));
            }
            Ok((victims, part.total_bytes()))
        })?;
        Ok(self.report(generation, victims, size_after))
    }

    /// Write `entry` and keep the partition within quota.
    ///
    /// An entry larger than the quota is rejected without touching the store.
    /// If the partition cannot be brought back under quota, the write is
    /// rolled back (the replaced value and any evicted entries are restored)
    /// and `QuotaExceeded` returned. The whole write holds the partition
    /// lock, so concurrent writers never see each other's intermediate state.
    pub fn admit(
        &self,
        generation: &GenerationId,
        entry: CacheEntry,
        protected: &HashSet<String>,
    ) -> Result<PutOutcome> {
        let quota = self.policy.quota_bytes;
        let key = entry.key.clone();
        let size_bytes = entry.size_bytes;
        let exceeded = || CacheError::QuotaExceeded {
            key: key.clone(),
            size_bytes,
            quota_bytes: quota,
        };

        if size_bytes > quota {
            return Err(exceeded());
        }

        let strategy = entry.strategy;
        let (outcome, victims, size_after) = self.store.update(generation, |part| {
            let outcome = part.put(&key, entry);
            let mut shielded = protected.clone();
            shielded.insert(key.clone());

            let mut victims = self.trim_strategy_locked(part, strategy, &shielded);
            if part.total_bytes() > quota {
                victims.extend(self.evict_locked(part, &shielded));
            }
            if part.total_bytes() <= quota {
                return Ok((outcome, victims, part.total_bytes()));
            }

            part.remove(&key);
            if let Some(previous) = outcome.previous {
                part.reinstate(previous);
            }
            for victim in victims {
                part.reinstate(victim);
            }
            Err(exceeded())
        })?;

        self.report(generation, victims, size_after);
        Ok(outcome)
    }

    /// Remove unpinned, unprotected entries in LRU order until the partition
    /// is at or below the target size. Caller holds the partition.
    fn evict_locked(
        &self,
        part: &mut PartitionWriter<'_>,
        protected: &HashSet<String>,
    ) -> Vec<CacheEntry> {
        let target = self.policy.target_bytes();
        let mut order: Vec<(DateTime<Utc>, u64, String)> = part
            .entries()
            .filter(|e| evictable(e, protected))
            .map(|e| (e.last_accessed_at, e.access_seq, e.key.clone()))
            .collect();
        order.sort_unstable();

        let mut victims = Vec::new();
        for (_, _, key) in order {
            if part.total_bytes() <= target {
                break;
            }
            if let Some(removed) = part.remove(&key) {
                victims.push(removed);
            }
        }
        victims
    }

    /// Drop the least recently used entries of `strategy` beyond its cap.
    /// Caller holds the partition.
    fn trim_strategy_locked(
        &self,
        part: &mut PartitionWriter<'_>,
        strategy: Strategy,
        protected: &HashSet<String>,
    ) -> Vec<CacheEntry> {
        let Some(&cap) = self.policy.max_entries.get(&strategy) else {
            return Vec::new();
        };
        let count = part.entries().filter(|e| e.strategy == strategy).count();
        if count <= cap {
            return Vec::new();
        }

        let mut order: Vec<(DateTime<Utc>, u64, String)> = part
            .entries()
            .filter(|e| e.strategy == strategy && evictable(e, protected))
            .map(|e| (e.last_accessed_at, e.access_seq, e.key.clone()))
            .collect();
        order.sort_unstable();
        order
            .into_iter()
            .take(count - cap)
            .filter_map(|(_, _, key)| part.remove(&key))
            .collect()
    }

    /// Emit events for committed evictions and summarize the pass.
    fn report(
        &self,
        generation: &GenerationId,
        victims: Vec<CacheEntry>,
        size_after: u64,
    ) -> EvictionReport {
        let mut report = EvictionReport {
            size_after,
            ..Default::default()
        };
        if victims.is_empty() && size_after <= self.policy.quota_bytes {
            return report;
        }

        for victim in victims {
            report.freed_bytes += victim.size_bytes;
            report.evicted.push(victim.key.clone());
            self.events.emit(CacheEvent::EntryEvicted {
                generation: generation.clone(),
                key: victim.key,
                size_bytes: victim.size_bytes,
            });
        }

        debug!(
            generation = %generation.short(),
            evicted = report.evicted.len(),
            freed_bytes = report.freed_bytes,
            size_after = report.size_after,
            "Eviction pass complete"
        );
        if report.size_after > self.policy.quota_bytes {
            warn!(
                generation = %generation.short(),
                size_after = report.size_after,
                quota = self.policy.quota_bytes,
                "Partition still over quota after eviction"
            );
        }
        report
    }

    /// Periodic pass over several partitions. `busy` yields the protected
    /// keys of each generation. Partitions that vanished mid-sweep are
    /// skipped.
    pub fn sweep(
        &self,
        generations: &[GenerationId],
        busy: impl Fn(&GenerationId) -> HashSet<String>,
    ) -> Vec<(GenerationId, EvictionReport)> {
        generations
            .iter()
            .filter_map(|generation| match self.enforce(generation, &busy(generation)) {
                Ok(report) => Some((generation.clone(), report)),
                Err(CacheError::GenerationNotFound(_)) => None,
                Err(e) => {
                    warn!(generation = %generation.short(), error = %e, "Sweep failed");
                    None
                }
            })
            .collect()
    }

    pub fn usage(&self, generation: &GenerationId) -> Result<QuotaUsage> {
        let stats = self.store.partition_stats(generation)?;
        let usage_percent = percent(stats.total_bytes, self.policy.quota_bytes);
        let level = if usage_percent >= self.policy.critical_percent {
            QuotaLevel::Critical
        } else if usage_percent >= self.policy.warning_percent {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Ok
        };

        Ok(QuotaUsage {
            generation: generation.clone(),
            used_bytes: stats.total_bytes,
            quota_bytes: self.policy.quota_bytes,
            usage_percent,
            entry_count: stats.entry_count,
            level,
        })
    }

    pub fn can_store(&self, generation: &GenerationId, size_bytes: u64) -> Result<StoreCheck> {
        let used = self.store.size(generation)?;
        let after = used.saturating_add(size_bytes);
        Ok(StoreCheck {
            can_store: after <= self.policy.quota_bytes,
            would_warn: percent(after, self.policy.quota_bytes) > self.policy.warning_percent,
            available_bytes: self.policy.quota_bytes.saturating_sub(used),
            needed_bytes: size_bytes,
        })
    }

    /// Biggest entries first.
    pub fn largest_entries(&self, generation: &GenerationId, limit: usize) -> Result<Vec<CacheEntry>> {
        let mut entries = self.store.list(generation)?;
        entries.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then(a.key.cmp(&b.key)));
        entries.truncate(limit);
        Ok(entries)
    }
}

fn evictable(entry: &CacheEntry, protected: &HashSet<String>) -> bool {
    !entry.pinned && !protected.contains(&entry.key)
}

fn lru_order(a: &CacheEntry, b: &CacheEntry) -> std::cmp::Ordering {
    a.last_accessed_at
        .cmp(&b.last_accessed_at)
        .then(a.access_seq.cmp(&b.access_seq))
}

fn percent(used: u64, quota: u64) -> f64 {
    if quota == 0 {
        return 100.0;
    }
    used as f64 / quota as f64 * 100.0
}
