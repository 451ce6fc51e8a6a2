//! Origin access for the cache engine.
//!
//! This module provides:
//! - The abstract [`Origin`] seam and its timeout/retry wrapper
//! - Retry logic with exponential backoff and jitter

mod origin;
mod retry;

pub use origin::{DynOrigin, Origin, OriginClient};
pub use retry::{retry_async, RetryConfig, RetryStats};
