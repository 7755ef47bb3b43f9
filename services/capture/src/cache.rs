//! Persistent key to blob cache on the client.
//!
//! Every call is commit-or-nothing: a reader sees either the previous value
//! or the complete new one, never a partially written blob.

use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Key under which the most recent recording is kept
pub const LATEST_RECORDING_KEY: &str = "latest-recording";

/// Key holding the playable length of the latest recording, in seconds
pub const LATEST_RECORDING_DURATION_KEY: &str = "latest-recording-duration";

#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Value under `key`, or `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Cache storing one file per key in a directory
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    /// Open the cache, creating its directory if needed
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            CaptureError::Cache(format!(
                "failed to create cache directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(CaptureError::Validation(format!("invalid cache key: {key:?}")));
        }
        Ok(self.directory.join(format!("{key}.bin")))
    }
}

#[async_trait]
impl LocalCache for FileCache {
    #[instrument(skip(self, value), fields(size_bytes = value.len()))]
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let target = self.path_for(key)?;
        let directory = self.directory.clone();

        // Write next to the target and rename over it so the swap is atomic.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&directory)
                .map_err(|e| CaptureError::Cache(format!("failed to create temp file: {e}")))?;
            temp.write_all(&value)
                .and_then(|_| temp.as_file().sync_all())
                .map_err(|e| CaptureError::Cache(format!("failed to write cache entry: {e}")))?;
            temp.persist(&target)
                .map_err(|e| CaptureError::Cache(format!("failed to commit cache entry: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| CaptureError::Cache(format!("cache writer task failed: {e}")))??;

        debug!(key, "Cache entry written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CaptureError::Cache(format!("failed to read cache entry: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::Cache(format!("failed to delete cache entry: {e}"))),
        }
    }
}

/// In-process cache
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
