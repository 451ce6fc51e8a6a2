//! The origin seam and the timeout/retry wrapper around it.
//!
//! The engine makes no protocol assumptions: an [`Origin`] turns a
//! [`Request`] into a [`Response`] or a network error. [`OriginClient`]
//! applies the configured per-attempt timeout and the retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::retry::{retry_async, RetryConfig};
use crate::error::{CacheError, Result};
use crate::models::{Request, Response};

/// Abstract network origin.
///
/// Implementations report transport failures as [`CacheError::Network`];
/// any response the origin produces, whatever its status, is `Ok`.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Shared handle to an origin.
pub type DynOrigin = Arc<dyn Origin>;

/// Origin wrapper applying timeouts and retries.
#[derive(Clone)]
pub struct OriginClient {
    origin: DynOrigin,
    timeout: Duration,
    retry: RetryConfig,
}

impl OriginClient {
    pub fn new(origin: DynOrigin, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            origin,
            timeout,
            retry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One attempt bounded by the request timeout.
    pub async fn fetch_once(&self, request: &Request) -> Result<Response> {
        match tokio::time::timeout(self.timeout, self.origin.fetch(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(key = %request.key, timeout_ms = self.timeout.as_millis() as u64, "Origin fetch timed out");
                Err(CacheError::Timeout(self.timeout))
            }
        }
    }

    /// Bounded fetch, retried per policy when `retry` is set.
    pub async fn fetch(&self, request: &Request, retry: bool) -> Result<Response> {
        if !retry {
            return self.fetch_once(request).await;
        }

        let (result, _stats) = retry_async(
            &self.retry,
            || self.fetch_once(request),
            CacheError::is_retryable,
        )
        .await;
        result
    }

    /// Single unbounded pass-through, used for network-only requests.
    pub async fn fetch_passthrough(&self, request: &Request) -> Result<Response> {
        self.origin.fetch(request).await
    }
}
