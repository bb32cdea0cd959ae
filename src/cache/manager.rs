//! Cache manager for persisting app metadata to disk
//!
//! Provides a `CacheManager` that stores serializable data to JSON files with
//! expiry timestamps. It backs the in-memory resolver cache so metadata
//! survives process restarts.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Wrapper struct for cached data stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    /// The cached data
    data: T,
    /// When the data was cached
    cached_at: DateTime<Utc>,
    /// When the cache entry expires
    expires_at: DateTime<Utc>,
}

/// Result of reading from cache, including metadata about cache freshness
#[derive(Debug)]
pub struct CachedData<T> {
    /// The cached data
    pub data: T,
    /// When the data was originally cached
    pub cached_at: DateTime<Utc>,
    /// When the data stops being fresh
    pub expires_at: DateTime<Utc>,
    /// Whether the cache entry had expired at read time
    pub is_expired: bool,
}

/// Manages reading and writing cached data to disk
///
/// The cache manager stores data as JSON files in an XDG-compliant cache directory
/// (`~/.cache/otherapps/` on Linux). Expired entries are still returned (with
/// `is_expired = true`) so callers can decide whether stale data is acceptable.
///
/// Timestamps are supplied by the caller, which keeps the manager usable with
/// an injected clock.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Creates a new CacheManager using XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "otherapps")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Directory where cache files are stored
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to a cache file for the given key
    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    /// Writes data to the cache
    ///
    /// # Arguments
    /// * `key` - Unique identifier for the cache entry (e.g., "app_389801252")
    /// * `data` - The data to cache (must implement Serialize)
    /// * `cached_at` - When the data was fetched
    /// * `ttl` - How long the cache entry should be considered fresh
    pub fn write<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        cached_at: DateTime<Utc>,
        ttl: Duration,
    ) -> std::io::Result<()> {
        self.ensure_dir()?;

        let entry = CacheEntry {
            data,
            cached_at,
            expires_at: cached_at + ttl,
        };

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(self.cache_path(key), json)
    }

    /// Reads data from the cache as of `now`
    ///
    /// Returns `None` if the cache entry doesn't exist or cannot be parsed.
    /// An entry is expired once `now` reaches its expiry timestamp.
    pub fn read<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<CachedData<T>> {
        let path = self.cache_path(key);
        let content = fs::read_to_string(path).ok()?;
        let entry: CacheEntry<T> = serde_json::from_str(&content).ok()?;

        Some(CachedData {
            data: entry.data,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            is_expired: now >= entry.expires_at,
        })
    }

    /// Removes a cache entry, ignoring entries that do not exist
    pub fn remove(&self, key: &str) -> std::io::Result<()> {
        match fs::remove_file(self.cache_path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
