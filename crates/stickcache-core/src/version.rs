//! Manifest hashing and generation lifecycle entry point.
//!
//! A generation is identified by the combined hash of its critical-resource
//! manifest. On startup the manifest hash is compared against the active and
//! the persisted generation; only a changed manifest creates, installs and
//! activates a new generation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::activation::{ActivationController, GenerationHandle};
use crate::error::{CacheError, Result};
use crate::models::GenerationId;
use crate::telemetry::{CacheEvent, DynEventSink};

/// One critical resource and the content hash it is expected to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    pub hash: String,
}

impl ManifestEntry {
    pub fn new(key: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hash: hash.into(),
        }
    }
}

/// Ordered list of critical resources for one application version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn from_pairs<K, H>(pairs: impl IntoIterator<Item = (K, H)>) -> Self
    where
        K: Into<String>,
        H: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(key, hash)| ManifestEntry::new(key, hash))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expected hash of `key`, if it is a critical resource.
    pub fn hash_of(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.hash.as_str())
    }

    /// SHA-256 over the ordered `(key, hash)` list, hex encoded.
    ///
    /// Order matters: the same resources listed differently form a
    /// different generation.
    pub fn combined_hash(&self) -> GenerationId {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.key.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.hash.as_bytes());
            hasher.update([b'\n']);
        }
        GenerationId::new(hex::encode(hasher.finalize()))
    }

    /// Parse a manifest from a JSON array of `{key, hash}` objects.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| CacheError::io_with_path(e, path))?;
        Self::from_json_str(&contents)
    }
}

/// The persisted "current generation" record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub current: GenerationId,
    pub previous: Option<GenerationId>,
    pub activated_at: DateTime<Utc>,
}

/// Storage for the current-generation record.
pub trait VersionStore: Send + Sync {
    /// Returns `None` when nothing has been activated yet.
    fn load(&self) -> Result<Option<VersionRecord>>;

    fn save(&self, record: &VersionRecord) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Shared handle to a version store.
pub type DynVersionStore = Arc<dyn VersionStore>;

/// Process-local version store.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    record: Mutex<Option<VersionRecord>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryVersionStore {
    fn load(&self) -> Result<Option<VersionRecord>> {
        self.record
            .lock()
            .map(|r| r.clone())
            .map_err(|e| CacheError::Internal(format!("version store lock poisoned: {}", e)))
    }

    fn save(&self, record: &VersionRecord) -> Result<()> {
        let mut current = self
            .record
            .lock()
            .map_err(|e| CacheError::Internal(format!("version store lock poisoned: {}", e)))?;
        *current = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut current = self
            .record
            .lock()
            .map_err(|e| CacheError::Internal(format!("version store lock poisoned: {}", e)))?;
        *current = None;
        Ok(())
    }
}

/// Version record kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileVersionStore {
    path: PathBuf,
}

impl JsonFileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionStore for JsonFileVersionStore {
    fn load(&self) -> Result<Option<VersionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&self.path).map_err(|e| CacheError::io_with_path(e, &self.path))?;
        let record = serde_json::from_str(&contents).map_err(|e| CacheError::Json {
            message: format!("Failed to parse {}: {}", self.path.display(), e),
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &VersionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| CacheError::io_with_path(e, parent))?;
            }
        }

        let serialized = serde_json::to_string_pretty(record)?;
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| CacheError::io_with_path(e, &temp_path))?;
            file.write_all(serialized.as_bytes())
                .map_err(|e| CacheError::io_with_path(e, &temp_path))?;
            file.sync_all()
                .map_err(|e| CacheError::io_with_path(e, &temp_path))?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| CacheError::io_with_path(e, &self.path))?;
        debug!("Atomically wrote {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io_with_path(e, &self.path)),
        }
    }
}

/// What `startup` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartupOutcome {
    /// The manifest matches the active generation.
    Unchanged { generation: GenerationId },
    /// The manifest matches the persisted generation; adopted without fetching.
    Restored { generation: GenerationId },
    /// A new generation was installed and activated.
    Created {
        generation: GenerationId,
        previous: Option<GenerationId>,
    },
}

impl StartupOutcome {
    pub fn generation(&self) -> &GenerationId {
        match self {
            StartupOutcome::Unchanged { generation }
            | StartupOutcome::Restored { generation }
            | StartupOutcome::Created { generation, .. } => generation,
        }
    }
}

/// Decides whether a startup needs a new generation and drives it through
/// install and activation.
pub struct VersionManager {
    versions: DynVersionStore,
    activation: Arc<ActivationController>,
    events: DynEventSink,
    // One startup at a time.
    startup_lock: tokio::sync::Mutex<()>,
}

impl VersionManager {
    pub fn new(
        versions: DynVersionStore,
        activation: Arc<ActivationController>,
        events: DynEventSink,
    ) -> Self {
        Self {
            versions,
            activation,
            events,
            startup_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn version_store(&self) -> &DynVersionStore {
        &self.versions
    }

    pub async fn startup(&self, manifest: Manifest) -> Result<StartupOutcome> {
        let _guard = self.startup_lock.lock().await;
        let hash = manifest.combined_hash();

        if self.activation.current_generation().as_ref() == Some(&hash) {
            debug!(generation = %hash.short(), "Manifest unchanged");
            return Ok(StartupOutcome::Unchanged { generation: hash });
        }

        if self.activation.current_generation().is_none() {
            let stored = self.versions.load()?;
            if stored.as_ref().map(|r| &r.current) == Some(&hash) {
                self.activation.adopt(hash.clone(), manifest)?;
                info!(generation = %hash.short(), "Restored persisted generation");
                return Ok(StartupOutcome::Restored { generation: hash });
            }
        }

        let handle = self.create_generation(manifest)?;
        self.activation.install(&handle).await?;
        let previous = self.activation.activate(&handle).await?;

        let record = VersionRecord {
            current: hash.clone(),
            previous: previous.clone(),
            activated_at: Utc::now(),
        };
        if let Err(e) = self.versions.save(&record) {
            warn!(generation = %hash.short(), error = %e, "Failed to persist version record");
        }

        Ok(StartupOutcome::Created {
            generation: hash,
            previous,
        })
    }

    /// Open a partition for the manifest's generation and register it as
    /// Installing.
    pub fn create_generation(&self, manifest: Manifest) -> Result<Arc<GenerationHandle>> {
        let generation = manifest.combined_hash();
        let critical_resources = manifest.len();
        let handle = self.activation.begin_install(generation.clone(), manifest)?;

        self.events.emit(CacheEvent::GenerationCreated {
            generation,
            previous: self.activation.current_generation(),
            critical_resources,
        });
        Ok(handle)
    }
}
