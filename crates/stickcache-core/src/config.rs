//! Engine configuration.
//!
//! [`EngineConfig`] is the externally supplied configuration: quota, eviction
//! headroom, per-strategy max ages, request timeout and retry count. Every
//! field has a default so a partial JSON document is enough. Default values
//! live on [`CacheDefaults`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::RuleConfig;
use crate::error::{CacheError, Result};
use crate::models::Strategy;
use crate::network::RetryConfig;

/// Default values for engine configuration.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const MAX_PARTITION_BYTES: u64 = 50 * 1024 * 1024; // 50MB
    pub const EVICTION_HEADROOM_RATIO: f64 = 0.1;
    pub const STALE_WHILE_REVALIDATE_MAX_AGE: Duration = Duration::from_secs(300);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const RETRY_COUNT: u32 = 1;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
    pub const QUOTA_WARNING_PERCENT: f64 = 75.0;
    pub const QUOTA_CRITICAL_PERCENT: f64 = 90.0;
    pub const OFFLINE_FALLBACK_KEY: &'static str = "/index.html";
}

/// Configuration for the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum total byte size of one partition.
    pub max_partition_bytes: u64,
    /// Fraction of the quota freed below the limit by an eviction pass.
    pub eviction_headroom_ratio: f64,
    /// Age after which cached content counts as stale, per strategy.
    pub per_strategy_max_age_ms: HashMap<Strategy, u64>,
    /// Cap on the number of entries cached under a strategy, on top of the
    /// byte quota. Strategies without a cap are limited by bytes only.
    pub per_strategy_max_entries: HashMap<Strategy, usize>,
    /// Bound on a single origin attempt.
    pub request_timeout_ms: u64,
    /// Retries after the first attempt for cache-first and network-first.
    pub retry_count: u32,
    /// Initial backoff between retries.
    pub retry_base_delay_ms: u64,
    /// Randomise backoff delays.
    pub retry_jitter: bool,
    /// Interval for the periodic eviction sweep, if any.
    pub sweep_interval_ms: Option<u64>,
    /// Usage percentage reported as a warning.
    pub quota_warning_percent: f64,
    /// Usage percentage reported as critical.
    pub quota_critical_percent: f64,
    /// Cached page served when a navigation fails with nothing cached.
    pub offline_fallback_key: Option<String>,
    /// Activate a freshly installed generation without waiting for drain.
    pub skip_waiting: bool,
    /// Strategy rules; empty means the built-in application rule set.
    pub rules: Vec<RuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut max_age = HashMap::new();
        max_age.insert(
            Strategy::StaleWhileRevalidate,
            CacheDefaults::STALE_WHILE_REVALIDATE_MAX_AGE.as_millis() as u64,
        );

        Self {
            max_partition_bytes: CacheDefaults::MAX_PARTITION_BYTES,
            eviction_headroom_ratio: CacheDefaults::EVICTION_HEADROOM_RATIO,
            per_strategy_max_age_ms: max_age,
            per_strategy_max_entries: HashMap::new(),
            request_timeout_ms: CacheDefaults::REQUEST_TIMEOUT.as_millis() as u64,
            retry_count: CacheDefaults::RETRY_COUNT,
            retry_base_delay_ms: CacheDefaults::RETRY_BASE_DELAY.as_millis() as u64,
            retry_jitter: true,
            sweep_interval_ms: None,
            quota_warning_percent: CacheDefaults::QUOTA_WARNING_PERCENT,
            quota_critical_percent: CacheDefaults::QUOTA_CRITICAL_PERCENT,
            offline_fallback_key: Some(CacheDefaults::OFFLINE_FALLBACK_KEY.to_string()),
            skip_waiting: false,
            rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| CacheError::io_with_path(e, path))?;
        Self::from_json_str(&contents)
    }

    pub fn with_max_partition_bytes(mut self, bytes: u64) -> Self {
        self.max_partition_bytes = bytes;
        self
    }

    pub fn with_eviction_headroom_ratio(mut self, ratio: f64) -> Self {
        self.eviction_headroom_ratio = ratio;
        self
    }

    pub fn with_max_age(mut self, strategy: Strategy, max_age: Duration) -> Self {
        self.per_strategy_max_age_ms
            .insert(strategy, max_age.as_millis() as u64);
        self
    }

    pub fn with_max_entries(mut self, strategy: Strategy, max_entries: usize) -> Self {
        self.per_strategy_max_entries.insert(strategy, max_entries);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.retry_jitter = jitter;
        self
    }

    pub fn with_offline_fallback_key(mut self, key: Option<String>) -> Self {
        self.offline_fallback_key = key;
        self
    }

    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    pub fn with_rules(mut self, rules: Vec<RuleConfig>) -> Self {
        self.rules = rules;
        self
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_partition_bytes == 0 {
            return Err(CacheError::Config {
                message: "max_partition_bytes must be greater than zero".into(),
            });
        }
        if !(0.0..1.0).contains(&self.eviction_headroom_ratio) {
            return Err(CacheError::Config {
                message: format!(
                    "eviction_headroom_ratio must be in [0, 1), got {}",
                    self.eviction_headroom_ratio
                ),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(CacheError::Config {
                message: "request_timeout_ms must be greater than zero".into(),
            });
        }
        if let Some((strategy, _)) = self.per_strategy_max_entries.iter().find(|(_, n)| **n == 0) {
            return Err(CacheError::Config {
                message: format!("per_strategy_max_entries for {} must be greater than zero", strategy),
            });
        }
        if self.quota_warning_percent > self.quota_critical_percent {
            return Err(CacheError::Config {
                message: format!(
                    "quota_warning_percent ({}) exceeds quota_critical_percent ({})",
                    self.quota_warning_percent, self.quota_critical_percent
                ),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_age(&self, strategy: Strategy) -> Option<Duration> {
        self.per_strategy_max_age_ms
            .get(&strategy)
            .map(|ms| Duration::from_millis(*ms))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    /// Retry policy for idempotent fetches: one attempt plus `retry_count`.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.retry_count.saturating_add(1))
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(CacheDefaults::RETRY_MAX_DELAY)
            .with_jitter(self.retry_jitter)
    }
}
