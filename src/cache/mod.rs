// Content-addressed cache of image descriptions, backed by an embedded
// SQLite database with per-entry expiry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

static IMAGE_CACHE: OnceCell<Option<Arc<ImageCache>>> = OnceCell::new();

/// Compute the SHA-256 hex digest of a base64 payload. The digest is the
/// cache key: identical payloads hash identically across restarts.
pub fn compute_hash(image_data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Process-wide cache handle, lazily opened from the configuration on first
/// use. Returns None when the backing store could not be opened; callers
/// degrade to cache misses and dropped writes.
pub fn global() -> Option<Arc<ImageCache>> {
    IMAGE_CACHE
        .get_or_init(|| {
            let config = crate::config::get();
            match ImageCache::open(&config.cache_path, config.cache_ttl_hours) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    tracing::error!("failed to open image cache: {}", e);
                    None
                }
            }
        })
        .clone()
}

pub struct ImageCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl ImageCache {
    pub fn open(path: &str, ttl_hours: u64) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS image_descriptions (
                hash TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Drop anything that expired while the process was down.
        conn.execute(
            "DELETE FROM image_descriptions WHERE expires_at <= ?1",
            [chrono::Utc::now().timestamp()],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::from_secs(ttl_hours * 3600),
        })
    }

    /// Look up a description by hash. Expired entries and backend errors
    /// are both reported as a miss.
    pub fn get(&self, hash: &str) -> Option<String> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT description, expires_at FROM image_descriptions WHERE hash = ?1",
            [hash],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        );

        match result {
            Ok((description, expires_at)) => {
                if expires_at > chrono::Utc::now().timestamp() {
                    Some(description)
                } else {
                    let _ = conn.execute(
                        "DELETE FROM image_descriptions WHERE hash = ?1",
                        [hash],
                    );
                    None
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                tracing::warn!("image cache read failed: {}", e);
                None
            }
        }
    }

    /// Store a description with the configured TTL. Failures are logged and
    /// swallowed; the middleware stays correct without the cache.
    pub fn set(&self, hash: &str, description: &str) {
        let expires_at = chrono::Utc::now().timestamp() + self.ttl.as_secs() as i64;
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO image_descriptions (hash, description, expires_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![hash, description, expires_at],
        ) {
            tracing::warn!("image cache write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(ttl_hours: u64) -> (tempfile::TempDir, ImageCache) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = ImageCache::open(path.to_str().unwrap(), ttl_hours).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_compute_hash_is_deterministic_hex() {
        let a = compute_hash("AAA");
        let b = compute_hash("AAA");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, compute_hash("AAB"));
    }

    #[test]
    fn test_get_set_roundtrip() {
        let (_dir, cache) = temp_cache(24);
        let hash = compute_hash("payload");
        assert_eq!(cache.get(&hash), None);

        cache.set(&hash, "a cat");
        assert_eq!(cache.get(&hash).as_deref(), Some("a cat"));

        cache.set(&hash, "a dog");
        assert_eq!(cache.get(&hash).as_deref(), Some("a dog"));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let (_dir, cache) = temp_cache(0);
        let hash = compute_hash("payload");
        cache.set(&hash, "stale");
        assert_eq!(cache.get(&hash), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let hash = compute_hash("payload");

        {
            let cache = ImageCache::open(path.to_str().unwrap(), 24).unwrap();
            cache.set(&hash, "persisted");
        }

        let cache = ImageCache::open(path.to_str().unwrap(), 24).unwrap();
        assert_eq!(cache.get(&hash).as_deref(), Some("persisted"));
    }
}
