//! Durable key-value storage for history and the cached catalog.
//!
//! Values are JSON strings. [`FileStore`] keeps one `<key>.json` file per key
//! in a state directory and survives restarts; [`MemoryStore`] lives only as
//! long as the process and is handy in tests.
//!
//! Neither store is encrypted or size-bounded: history grows until the user
//! clears it.

use crate::error::DocshiftError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Well-known storage keys.
pub mod keys {
    /// Resolved generic-conversion jobs.
    pub const CONVERSION_HISTORY: &str = "conversion_history";
    /// Resolved OCR jobs.
    pub const OCR_HISTORY: &str = "ocr_history";
    /// Cached capability catalog.
    pub const SUPPORTED_CONVERSIONS: &str = "supported_conversions";
}

/// A process-external string store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DocshiftError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), DocshiftError>;
    async fn remove(&self, key: &str) -> Result<(), DocshiftError>;
}

// ── FileStore ────────────────────────────────────────────────────────────

/// Directory-backed store: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_DATA_HOME/docshift` (or the platform equivalent), falling back
    /// to `./.docshift` when no data directory is known.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("docshift"))
            .unwrap_or_else(|| PathBuf::from(".docshift"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn storage_err(key: &str) -> impl FnOnce(std::io::Error) -> DocshiftError + '_ {
    move |source| DocshiftError::Storage {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DocshiftError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(key)(e)),
        }
    }

    /// Atomic write: temp file in the same directory, then rename, so a crash
    /// never leaves a half-written history file behind.
    async fn set(&self, key: &str, value: &str) -> Result<(), DocshiftError> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let value = value.to_owned();
        let owned_key = key.to_owned();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| DocshiftError::Internal(format!("storage task failed: {e}")))?
        .map_err(storage_err(&owned_key))?;

        debug!("FileStore: wrote '{}'", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DocshiftError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(key)(e)),
        }
    }
}

// ── MemoryStore ──────────────────────────────────────────────────────────

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> DocshiftError {
        DocshiftError::Internal("memory store lock poisoned".into())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DocshiftError> {
        let map = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DocshiftError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DocshiftError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        map.remove(key);
        Ok(())
    }
}

// ── Typed helpers ────────────────────────────────────────────────────────

/// Read and decode a JSON value. Missing keys yield `None`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, DocshiftError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| DocshiftError::CorruptStorage {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), DocshiftError> {
    let raw = serde_json::to_string(value).map_err(|source| DocshiftError::CorruptStorage {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}

/// An ordered JSON array of records stored under one key.
///
/// Every method is a complete read-modify-write; callers serialise
/// concurrent writers (the registry does so under its lock).
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>, DocshiftError> {
        Ok(load_json(&*self.store, &self.key).await?.unwrap_or_default())
    }

    pub async fn append<T: Serialize>(&self, record: &T) -> Result<(), DocshiftError> {
        let mut records: Vec<serde_json::Value> = self.load().await?;
        let value = serde_json::to_value(record).map_err(|source| DocshiftError::CorruptStorage {
            key: self.key.clone(),
            source,
        })?;
        records.push(value);
        save_json(&*self.store, &self.key, &records).await
    }

    pub async fn rewrite<T: Serialize>(&self, records: &[T]) -> Result<(), DocshiftError> {
        save_json(&*self.store, &self.key, records).await
    }

    pub async fn clear(&self) -> Result<(), DocshiftError> {
        self.store.remove(&self.key).await
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").field("key", &self.key).finish()
    }
}
