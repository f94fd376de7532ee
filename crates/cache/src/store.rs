//! Content-addressed result store
//!
//! One JSON file per key, directly under the store root:
//!
//! ```text
//! <workdir>/map_cache/
//!   3f2a...e1.json
//!   9b07...4c.json
//! ```
//!
//! Writes go to a uniquely named temporary file in the same directory and are
//! then renamed over the final path, so readers see either the previous
//! complete entry or the new complete entry.

use crate::{CacheKey, ComputationId, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Subdirectory of the working directory holding cache entries
pub const CACHE_DIR_NAME: &str = "map_cache";

/// File extension of committed entries
pub const ENTRY_EXTENSION: &str = "json";

/// A persisted computation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The computed value
    pub value: serde_json::Value,
    /// Wall-clock time the computation took
    pub elapsed: Duration,
    /// Identity of the computation that produced the value
    pub computation: ComputationId,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// Version of memomap that wrote this entry
    pub memomap_version: String,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    #[must_use]
    pub fn new(value: serde_json::Value, elapsed: Duration, computation: ComputationId) -> Self {
        Self {
            value,
            elapsed,
            computation,
            created_at: Utc::now(),
            memomap_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Directory-backed key to entry mapping
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at the given directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the store for a working directory (`<workdir>/map_cache`)
    #[must_use]
    pub fn in_workdir(workdir: impl AsRef<Path>) -> Self {
        Self::new(workdir.as_ref().join(CACHE_DIR_NAME))
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the committed entry for a key
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", key.as_hex()))
    }

    /// Check if an entry exists
    #[must_use]
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Load an entry
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no entry, [`Error::CacheCorrupt`]
    /// if the stored bytes do not decode, and [`Error::Io`] otherwise.
    pub fn load(&self, key: &CacheKey) -> Result<CacheEntry> {
        let path = self.entry_path(key);
        tracing::info!(key = %key, path = %path.display(), "Loading cache entry");
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(key.as_hex()));
            }
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        serde_json::from_slice(&data)
            .map_err(|e| Error::corrupt(key.as_hex(), &path, e.to_string()))
    }

    /// Store an entry, replacing any previous entry for the key
    ///
    /// # Errors
    ///
    /// Returns error if serialization or IO operations fail
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(key);
        tracing::info!(key = %key, path = %path.display(), "Storing cache entry");

        let json = serde_json::to_vec(entry)
            .map_err(|e| Error::serialization(format!("Failed to serialize cache entry: {e}")))?;

        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))?;

        // Temp file lives next to the final path so the rename stays on one filesystem
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", key.as_hex()))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| Error::io(e, &self.root, "create temp file"))?;
        tmp.write_all(&json)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;

        tmp.persist(&path)
            .map_err(|e| Error::io(e.error, &path, "rename"))?;
        Ok(())
    }

    /// Remove an entry if present
    ///
    /// # Errors
    ///
    /// Returns error if IO operations fail
    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &path, "remove_file")),
        }
    }

    /// List the keys of all committed entries
    ///
    /// # Errors
    ///
    /// Returns error if directory traversal fails
    pub fn keys(&self) -> Result<Vec<CacheKey>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))? {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir_entry"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(key) = CacheKey::from_hex(stem)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
