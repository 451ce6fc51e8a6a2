//! A local directory standing in for the network origin.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use stickcache_core::classifier::APP_SHELL;
use stickcache_core::{CacheError, Manifest, ManifestEntry, Origin, Request, Response, Result};
use tracing::debug;

/// Serves `/a/b.js` from `<root>/a/b.js`; `/` maps to `index.html`.
pub struct DirectoryOrigin {
    root: PathBuf,
}

impl DirectoryOrigin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path for a key, or `None` if the key escapes the root.
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        let path = key.split(['?', '#']).next().unwrap_or(key);
        let relative = path.trim_start_matches('/');
        let relative = if relative.is_empty() { "index.html" } else { relative };

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Manifest of the application shell files present under the root,
    /// hashed by content.
    pub fn shell_manifest(&self) -> Result<Manifest> {
        let mut entries = Vec::new();
        for key in APP_SHELL {
            let Some(path) = self.resolve(key) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| CacheError::io_with_path(e, &path))?;
            entries.push(ManifestEntry::new(*key, hex::encode(Sha256::digest(&bytes))));
        }
        Ok(Manifest::new(entries))
    }
}

#[async_trait]
impl Origin for DirectoryOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let Some(path) = self.resolve(&request.key) else {
            return Ok(Response::new(400, "bad path"));
        };

        match tokio::fs::read(&path).await {
            Ok(body) => {
                debug!(key = %request.key, bytes = body.len(), "Served from directory");
                Ok(Response::ok(body).with_header("content-type", content_type(&path)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Response::new(404, "not found")),
            Err(e) => Err(CacheError::Network {
                message: format!("{}: {}", path.display(), e),
                status: None,
            }),
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
