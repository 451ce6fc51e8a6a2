//! Stickcache CLI - drive the cache engine against a local directory.
//!
//! Loads an engine configuration and a critical-resource manifest, runs
//! startup against a directory standing in for the origin, replays the given
//! requests and prints the results and final cache statistics as JSON lines.

mod origin;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use stickcache_core::{
    CacheEngine, EngineConfig, Freshness, JsonFileVersionStore, Manifest, Request, ResponseSource,
    Strategy,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::origin::DirectoryOrigin;

#[derive(Parser, Debug)]
#[command(name = "stickcache")]
#[command(about = "Run the offline cache engine against a local directory")]
struct Args {
    /// Directory served as the origin
    #[arg(long)]
    root: PathBuf,

    /// Manifest JSON (`[{"key": ..., "hash": ...}]`); defaults to hashing the
    /// application shell files found under the root
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Engine configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// File persisting the current generation between runs
    #[arg(long)]
    state: Option<PathBuf>,

    /// Request a key (repeatable)
    #[arg(short, long = "request")]
    requests: Vec<String>,

    /// Request a key as a page navigation (repeatable)
    #[arg(long = "navigate")]
    navigations: Vec<String>,

    /// Run an eviction sweep before printing stats
    #[arg(long)]
    sweep: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize)]
struct RequestReport<'a> {
    key: &'a str,
    status: u16,
    bytes: usize,
    source: ResponseSource,
    freshness: Freshness,
    strategy: Strategy,
}

#[derive(Serialize)]
struct FailureReport<'a> {
    key: &'a str,
    error: String,
    kind: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the JSON report.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let origin = DirectoryOrigin::new(&args.root);
    let manifest = match &args.manifest {
        Some(path) => {
            Manifest::load(path).with_context(|| format!("loading manifest {}", path.display()))?
        }
        None => origin
            .shell_manifest()
            .with_context(|| format!("hashing shell under {}", args.root.display()))?,
    };
    info!(
        root = %args.root.display(),
        critical_resources = manifest.len(),
        "Starting stickcache"
    );

    let mut builder = CacheEngine::builder()
        .config(config)
        .origin(Arc::new(origin));
    if let Some(state) = &args.state {
        builder = builder.version_store(Arc::new(JsonFileVersionStore::new(state)));
    }
    let engine = builder.build().context("building engine")?;

    let sweeper = engine.config().sweep_interval().map(|interval| engine.spawn_sweeper(interval));

    let outcome = engine.startup(manifest).await.context("startup")?;
    println!("{}", serde_json::to_string(&outcome)?);

    let requests = args
        .requests
        .iter()
        .map(|key| Request::get(key.as_str()))
        .chain(args.navigations.iter().map(|key| Request::navigate(key.as_str())));
    for request in requests {
        let line = match engine.handle_request(&request).await {
            Ok(served) => serde_json::to_string(&RequestReport {
                key: &request.key,
                status: served.response.status,
                bytes: served.response.body.len(),
                source: served.source,
                freshness: served.freshness,
                strategy: served.strategy,
            })?,
            Err(e) => {
                warn!(key = %request.key, error = %e, "Request failed");
                serde_json::to_string(&FailureReport {
                    key: &request.key,
                    error: e.to_string(),
                    kind: e.kind(),
                })?
            }
        };
        println!("{}", line);
    }

    if args.sweep {
        for (generation, report) in engine.sweep() {
            info!(
                generation = %generation.short(),
                evicted = report.evicted.len(),
                freed_bytes = report.freed_bytes,
                "Sweep"
            );
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    println!("{}", serde_json::to_string(&engine.stats())?);
    if let Some(usage) = engine.usage()? {
        println!("{}", serde_json::to_string(&usage)?);
    }

    Ok(())
}
