//! Authentication token cache
//!
//! Tokens are keyed by certificate identity and live for a short fixed TTL.
//! The cache itself is a seam: in-memory for a single process, or a
//! directory of JSON files shared between processes.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

/// Default token lifetime in seconds
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;

/// A token and the instant it stops being reused
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CachedToken {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Storage for cached tokens
pub trait TokenCache: Send + Sync {
    /// Stored token for `key`, fresh or not
    fn get(&self, key: &str) -> Option<CachedToken>;

    fn put(&self, key: &str, token: CachedToken) -> Result<()>;

    fn remove(&self, key: &str);
}

/// Process-local token cache
#[derive(Debug, Default)]
pub struct MemoryTokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCache for MemoryTokenCache {
    fn get(&self, key: &str) -> Option<CachedToken> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, token: CachedToken) -> Result<()> {
        self.entries.lock().insert(key.to_string(), token);
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Token cache backed by one JSON file per key
///
/// File names are the SHA-256 of the key, so certificate identities do not
/// appear on disk.
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    dir: PathBuf,
}

impl FileTokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
    }
}

impl TokenCache for FileTokenCache {
    fn get(&self, key: &str) -> Option<CachedToken> {
        let path = self.path_for(key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unreadable token file");
                None
            }
        }
    }

    fn put(&self, key: &str, token: CachedToken) -> Result<()> {
        let content = serde_json::to_vec(&token)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&content)?;
        file.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

/// One async lock per cache key
///
/// Serializes concurrent cache misses for the same identity so only one
/// seed/token exchange runs at a time.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(key.to_string()).or_default())
    }

    /// Forget the lock for `key` once no caller holds it
    pub fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    /// Keys with a live lock
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(ttl_secs: i64) -> CachedToken {
        CachedToken::new("TOKEN123", Utc::now(), Duration::seconds(ttl_secs))
    }

    #[test]
    fn test_key_locks_released_when_unused() {
        let locks = KeyLocks::new();
        let first = locks.lock_for("a");
        let second = locks.lock_for("a");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(locks.len(), 1);

        drop(first);
        locks.release("a");
        assert_eq!(locks.len(), 1, "still held by another caller");

        drop(second);
        locks.release("a");
        assert!(locks.is_empty());

        locks.release("never-seen");
        assert!(locks.is_empty());
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let t = CachedToken::new("x", now, Duration::seconds(60));
        assert!(t.is_fresh(now + Duration::seconds(59)));
        assert!(!t.is_fresh(now + Duration::seconds(60)));
    }

    #[test]
    fn test_debug_hides_token() {
        assert!(!format!("{:?}", token(60)).contains("TOKEN123"));
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryTokenCache::new();
        assert!(cache.get("a").is_none());
        cache.put("a", token(60)).unwrap();
        assert_eq!(cache.get("a").unwrap().token, "TOKEN123");
        cache.remove("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_file_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path().join("tokens")).unwrap();
        let stored = token(60);
        cache.put("11111111-1:abcd", stored.clone()).unwrap();

        let reopened = FileTokenCache::new(dir.path().join("tokens")).unwrap();
        assert_eq!(reopened.get("11111111-1:abcd"), Some(stored));

        let names: Vec<String> = std::fs::read_dir(cache.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].contains("11111111"));

        cache.remove("11111111-1:abcd");
        assert!(cache.get("11111111-1:abcd").is_none());
    }

    #[test]
    fn test_file_cache_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path()).unwrap();
        std::fs::write(cache.path_for("k"), b"{not json").unwrap();
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_key_locks_share_per_key() {
        let locks = KeyLocks::new();
        let a1 = locks.lock_for("a");
        let a2 = locks.lock_for("a");
        let b = locks.lock_for("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let _held = a1.lock().await;
        assert!(a2.try_lock().is_err());
        assert!(b.try_lock().is_ok());
    }
}
