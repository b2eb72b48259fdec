// Dependency cache keyed by the manifest hash
//
// Layout: <root>/<key>/data holds whatever the installer caches,
// <root>/<key>/entry.json marks the entry as complete. An entry without the
// marker is treated as a miss.

use crate::errors::CacheError;
use crate::manifest::Manifest;
use crate::models::CacheStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const ENTRY_FILE: &str = "entry.json";
const DATA_DIR: &str = "data";

/// Build the cache key for a manifest: `<os>-<prefix>-<sha256>`
pub fn cache_key(prefix: &str, manifest: &Manifest) -> String {
    format!("{}-{}-{}", std::env::consts::OS, prefix, manifest.digest())
}

/// Completion marker stored alongside cached data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub manifest_digest: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a cache restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub key: String,
    pub status: CacheStatus,
    /// Directory the installer reads from and writes to
    pub data_dir: PathBuf,
}

/// DependencyCache manages cache entries under a root directory
#[derive(Debug, Clone)]
pub struct DependencyCache {
    root: PathBuf,
}

impl DependencyCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Look up `key`, preparing its data directory either way
    #[instrument(skip(self))]
    pub async fn restore(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let entry_dir = self.entry_dir(key);
        let data_dir = entry_dir.join(DATA_DIR);

        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| io_error(&data_dir, e))?;

        let status = match self.read_entry(key).await? {
            Some(entry) if entry.key == key => CacheStatus::Hit,
            Some(entry) => {
                debug!(stored_key = %entry.key, "Cache marker belongs to another key");
                CacheStatus::Miss
            }
            None => CacheStatus::Miss,
        };

        info!(cache_key = key, status = %status, "Dependency cache consulted");

        Ok(CacheLookup {
            key: key.to_string(),
            status,
            data_dir,
        })
    }

    /// Mark `key` as complete; returns false when another run saved it first
    #[instrument(skip(self))]
    pub async fn save(&self, key: &str, manifest_digest: &str) -> Result<bool, CacheError> {
        let entry_dir = self.entry_dir(key);
        let marker = entry_dir.join(ENTRY_FILE);

        if tokio::fs::try_exists(&marker)
            .await
            .map_err(|e| io_error(&marker, e))?
        {
            debug!(cache_key = key, "Cache entry already exists, skipping save");
            return Ok(false);
        }

        tokio::fs::create_dir_all(&entry_dir)
            .await
            .map_err(|e| io_error(&entry_dir, e))?;

        let entry = CacheEntry {
            key: key.to_string(),
            manifest_digest: manifest_digest.to_string(),
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&entry).map_err(|e| CacheError::InvalidEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        // Rename keeps readers from ever seeing a half-written marker
        let temp = entry_dir.join(format!("{}.{}.tmp", ENTRY_FILE, Uuid::new_v4()));
        tokio::fs::write(&temp, body)
            .await
            .map_err(|e| io_error(&temp, e))?;
        tokio::fs::rename(&temp, &marker)
            .await
            .map_err(|e| io_error(&marker, e))?;

        info!(cache_key = key, "Dependency cache saved");
        Ok(true)
    }

    /// Read the completion marker of `key`, if present
    pub async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let marker = self.entry_dir(key).join(ENTRY_FILE);

        match tokio::fs::read(&marker).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::InvalidEntry {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&marker, e)),
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
