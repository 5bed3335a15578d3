//! Embedded key/value cache for Blade
//!
//! This crate wraps a local [sled] database in the bucket-oriented API the
//! rest of Blade consumes: opaque string values under opaque string keys,
//! grouped into named buckets.
//!
//! # Buckets
//!
//! - [`HOST_LOOKUP_BUCKET`] records the result of dynamic host lookups
//! - [`RECIPE_COMMAND_BUCKET`] records the recipe checksum seen at each run
//!
//! # Example
//!
//! ```no_run
//! use convenient_cache::{CacheDb, HOST_LOOKUP_BUCKET};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = CacheDb::open("blade-cache.db")?;
//!     db.put(HOST_LOOKUP_BUCKET, "ips prod redis", "r1,r2")?;
//!     assert_eq!(db.get(HOST_LOOKUP_BUCKET, "ips prod redis")?.as_deref(), Some("r1,r2"));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Underlying storage failed
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A record payload could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored value is not valid UTF-8
    #[error("value under key {0} is not valid UTF-8")]
    NotUtf8(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Bucket holding host-lookup results, keyed by the lookup command.
pub const HOST_LOOKUP_BUCKET: &str = "hostLookupCacheBucket";

/// Bucket holding per-recipe checksums, keyed by recipe name.
pub const RECIPE_COMMAND_BUCKET: &str = "recipeCommandCacheBucket";

/// Default on-disk location of the Blade cache database.
pub const DEFAULT_CACHE_PATH: &str = "blade-cache.db";

/// Handle to the embedded Blade database.
///
/// Buckets map onto sled trees; values are stored as UTF-8 bytes. The
/// handle is cheap to clone and safe to share.
#[derive(Clone)]
pub struct CacheDb {
    db: sled::Db,
}

impl CacheDb {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Storage` when the database cannot be opened,
    /// e.g. when another process holds the lock.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Store `value` under `key` in the named bucket.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Storage` when the write fails.
    pub fn put(&self, bucket: &str, key: &str, value: &str) -> CacheResult<()> {
        let tree = self.db.open_tree(bucket)?;
        tree.insert(key, value.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    /// Fetch the value under `key` from the named bucket.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotUtf8` when a stored value is not UTF-8.
    pub fn get(&self, bucket: &str, key: &str) -> CacheResult<Option<String>> {
        let tree = self.db.open_tree(bucket)?;
        match tree.get(key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| CacheError::NotUtf8(key.to_string())),
            None => Ok(None),
        }
    }

    /// Destroy the contents of every Blade bucket.
    ///
    /// Blade rebuilds the cache on the next run.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Storage` when a bucket cannot be cleared.
    pub fn clear_all(&self) -> CacheResult<()> {
        for bucket in [HOST_LOOKUP_BUCKET, RECIPE_COMMAND_BUCKET] {
            let tree = self.db.open_tree(bucket)?;
            tree.clear()?;
            tree.flush()?;
        }
        Ok(())
    }
}

/// Record written under [`HOST_LOOKUP_BUCKET`] after each dynamic lookup.
///
/// The lookup itself always executes; these records exist so a read-side
/// cache with a TTL can be layered on later without a schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLookupRecord {
    /// The shell command that produced the hosts
    pub command: String,
    /// The hosts the command returned
    pub hosts: Vec<String>,
    /// When the lookup ran
    pub looked_up_at: DateTime<Utc>,
}

impl HostLookupRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(command: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            command: command.into(),
            hosts,
            looked_up_at: Utc::now(),
        }
    }

    /// Encode the record as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Encoding` when serialization fails.
    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a record from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Encoding` when the payload is malformed.
    pub fn from_json(payload: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let db = CacheDb::open(temp.path().join("cache.db")).unwrap();

        db.put(HOST_LOOKUP_BUCKET, "query", "h1,h2").unwrap();
        assert_eq!(
            db.get(HOST_LOOKUP_BUCKET, "query").unwrap().as_deref(),
            Some("h1,h2")
        );
        assert_eq!(db.get(HOST_LOOKUP_BUCKET, "absent").unwrap(), None);
    }

    #[test]
    fn buckets_are_isolated() {
        let temp = TempDir::new().unwrap();
        let db = CacheDb::open(temp.path().join("cache.db")).unwrap();

        db.put(HOST_LOOKUP_BUCKET, "key", "lookup").unwrap();
        db.put(RECIPE_COMMAND_BUCKET, "key", "recipe").unwrap();

        assert_eq!(
            db.get(HOST_LOOKUP_BUCKET, "key").unwrap().as_deref(),
            Some("lookup")
        );
        assert_eq!(
            db.get(RECIPE_COMMAND_BUCKET, "key").unwrap().as_deref(),
            Some("recipe")
        );
    }

    #[test]
    fn clear_all_empties_every_bucket() {
        let temp = TempDir::new().unwrap();
        let db = CacheDb::open(temp.path().join("cache.db")).unwrap();

        db.put(HOST_LOOKUP_BUCKET, "a", "1").unwrap();
        db.put(RECIPE_COMMAND_BUCKET, "b", "2").unwrap();
        db.clear_all().unwrap();

        assert_eq!(db.get(HOST_LOOKUP_BUCKET, "a").unwrap(), None);
        assert_eq!(db.get(RECIPE_COMMAND_BUCKET, "b").unwrap(), None);
    }

    #[test]
    fn lookup_record_round_trip() {
        let record = HostLookupRecord::new("ips prod redis", vec!["r1".into(), "r2".into()]);
        let json = record.to_json().unwrap();
        let decoded = HostLookupRecord::from_json(&json).unwrap();
        assert_eq!(record, decoded);
    }
}
