//! Content-addressed, TTL-bounded response cache.
//!
//! One JSON file per cached URL, named by the SHA-256 of the URL, fronted by
//! an in-memory moka layer with the same TTL. The cache is a performance
//! layer, never a correctness dependency: every storage failure logs at warn
//! and degrades to a miss. Hit/miss accounting belongs to the caller, which
//! owns the batch statistics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// A cached page. Owned exclusively by the cache; created on a successful
/// fetch, destroyed by TTL expiry or eviction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub content: String,
    pub headers: HashMap<String, String>,
    pub status_code: u16,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Entries older than this are evicted on read.
    pub max_age: Duration,
    /// Entry-count bound enforced by `cleanup`.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: Duration::from_secs(3600),
            max_entries: 1000,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Compute the content-addressed key for a URL: 64-char hex SHA-256.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct ResponseCache {
    config: CacheConfig,
    hot: moka::future::Cache<String, Arc<CacheEntry>>,
}

impl ResponseCache {
    /// Create a cache rooted at `config.dir`, creating the directory if
    /// needed. Directory creation failure is the one hard error here: a
    /// cache that can never store anything is a configuration problem.
    pub fn new(config: CacheConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.dir).map_err(|e| {
            AppError::ConfigError(format!(
                "cannot create cache dir {}: {e}",
                config.dir.display()
            ))
        })?;

        let hot = moka::future::Cache::builder()
            .max_capacity(config.max_entries as u64)
            .time_to_live(config.max_age)
            .build();

        Ok(Self { config, hot })
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.config.dir.join(format!("{}.json", cache_key(url)))
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.stored_at);
        age.to_std().map(|a| a > self.config.max_age).unwrap_or(true)
    }

    /// Look up a URL. Expired disk entries are evicted and treated as absent.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.hot.get(&cache_key(url)).await {
            return Some((*entry).clone());
        }

        let path = self.entry_path(url);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Corrupt cache entry, evicting");
                remove_quietly(&path);
                return None;
            }
        };

        if self.is_expired(&entry) {
            tracing::debug!(url = %url, "Cache entry expired");
            remove_quietly(&path);
            return None;
        }

        self.hot.insert(cache_key(url), Arc::new(entry.clone())).await;
        Some(entry)
    }

    /// Store a fetched page and enforce the entry-count bound.
    pub async fn set(
        &self,
        url: &str,
        content: String,
        headers: HashMap<String, String>,
        status_code: u16,
    ) {
        let entry = CacheEntry {
            url: url.to_string(),
            content,
            headers,
            status_code,
            stored_at: Utc::now(),
        };

        match serde_json::to_string(&entry) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(self.entry_path(url), serialized) {
                    tracing::warn!(url = %url, error = %e, "Cache write failed, keeping in-memory only");
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache entry serialization failed");
            }
        }

        self.hot.insert(cache_key(url), Arc::new(entry)).await;
        self.cleanup().await;
    }

    /// Evict oldest-by-modification-time files until under `max_entries`.
    pub async fn cleanup(&self) {
        let mut entries = match self.list_entry_files() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Cache cleanup scan failed");
                return;
            }
        };
        if entries.len() <= self.config.max_entries {
            return;
        }

        entries.sort_by_key(|(_, mtime)| *mtime);
        let excess = entries.len() - self.config.max_entries;
        for (path, _) in entries.into_iter().take(excess) {
            tracing::debug!(path = %path.display(), "Evicting cache entry");
            remove_quietly(&path);
        }
    }

    /// Remove all entries, disk and memory.
    pub async fn clear(&self) {
        match self.list_entry_files() {
            Ok(entries) => {
                for (path, _) in entries {
                    remove_quietly(&path);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Cache clear scan failed"),
        }
        self.hot.invalidate_all();
    }

    /// Number of entry files currently on disk.
    pub fn disk_entries(&self) -> usize {
        self.list_entry_files().map(|e| e.len()).unwrap_or(0)
    }

    fn list_entry_files(&self) -> Result<Vec<(PathBuf, std::time::SystemTime)>, std::io::Error> {
        let mut out = Vec::new();
        for dirent in std::fs::read_dir(&self.config.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mtime = dirent
                .metadata()?
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            out.push((path, mtime));
        }
        Ok(out)
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Cache eviction failed");
    }
}
