//! Request, response and identifier types shared across the engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Immutable version token: the combined hash of a critical-resource manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl From<&str> for GenerationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GenerationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caching policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkOnly => "network-only",
        }
    }

    /// Strategies whose network failures get the bounded retry.
    pub fn retries_network(&self) -> bool {
        matches!(self, Strategy::CacheFirst | Strategy::NetworkFirst)
    }

    /// Whether responses fetched under this strategy are written to the store.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Strategy::NetworkOnly)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request method, reduced to what classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Safe reads may be cached and deduplicated.
    pub fn is_safe_read(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// How the request was issued by the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// A top-level page load; eligible for the offline page fallback.
    Navigate,
    #[default]
    Resource,
}

/// A request for one resource, addressed by its cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: String,
    pub method: Method,
    pub mode: RequestMode,
}

impl Request {
    pub fn new(method: Method, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            method,
            mode: RequestMode::Resource,
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(Method::Get, key)
    }

    pub fn navigate(key: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(key)
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Opaque origin response: status, headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Only complete successful responses are stored.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }

    /// Bytes charged against the partition quota for this payload.
    pub fn payload_size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (headers + self.body.len()) as u64
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    Network,
    /// The offline page, served for a failed navigation.
    OfflineFallback,
}

/// Freshness of a cached response relative to its strategy's max age.
///
/// `Stale` is informational: it is how stale-while-revalidate reports that
/// expired content was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// The result of `handle_request`.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Response,
    pub source: ResponseSource,
    pub freshness: Freshness,
    pub strategy: Strategy,
    /// Generation the request was bound to; `None` when no generation was
    /// active and the response went uncached.
    pub generation: Option<GenerationId>,
}
