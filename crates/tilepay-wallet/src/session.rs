//! Session seed store.
//!
//! Maps a session identifier to the random seed its addresses are derived
//! from. The seed lives only in the cache, under a sliding expiry: every
//! access pushes the deadline out again, and once it lapses the session
//! starts over with a fresh seed.

use crate::error::WalletError;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tilepay_store::{keys, Cache, StoreError};
use tilepay_types::constants::SESSION_SEED_LEN;

/// Derivation seed of one session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSeed([u8; SESSION_SEED_LEN]);

impl SessionSeed {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_SEED_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_SEED_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSeed(..)")
    }
}

pub struct SessionKeyStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl SessionKeyStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Seed of `session_id`, created on first use and renewed on every call.
    pub fn get(&self, session_id: &str) -> Result<SessionSeed, WalletError> {
        if session_id.trim().is_empty() {
            return Err(WalletError::InvalidSession("empty".into()));
        }
        let key = keys::session(session_id);

        // Two rounds cover losing a creation race to a concurrent request.
        for _ in 0..2 {
            let seed = match self.cache.get(&key)? {
                Some(bytes) => {
                    let seed = SessionSeed::from_bytes(&bytes).ok_or_else(|| StoreError::Corrupt {
                        field: "session seed",
                        reason: format!("expected {} bytes, found {}", SESSION_SEED_LEN, bytes.len()),
                    })?;
                    if self.cache.expire(&key, self.ttl)? {
                        log::debug!("renewed session seed for {}", session_id);
                        return Ok(seed);
                    }
                    // Lapsed between the read and the renewal; store it again.
                    seed
                }
                None => SessionSeed::generate(),
            };

            if self.cache.set_nx(&key, seed.as_bytes(), Some(self.ttl))? {
                log::debug!("stored session seed for {}", session_id);
                return Ok(seed);
            }
        }

        Err(WalletError::KeyDerivation(format!(
            "session seed for {} could not be stored",
            session_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tilepay_store::MemoryCache;

    /// Drops the entry the first time its lifetime is extended, as if it
    /// expired right after being read.
    #[derive(Default)]
    struct LapsingCache {
        inner: MemoryCache,
        lapsed: AtomicBool,
    }

    impl Cache for LapsingCache {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl)
        }

        fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
            self.inner.set_nx(key, value, ttl)
        }

        fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            if !self.lapsed.swap(true, Ordering::SeqCst) {
                self.inner.delete(key)?;
                return Ok(false);
            }
            self.inner.expire(key, ttl)
        }

        fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key)
        }

        fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key)
        }

        fn purge_expired(&self) -> Result<u64, StoreError> {
            self.inner.purge_expired()
        }
    }

    #[test]
    fn test_same_session_same_seed() {
        let store = SessionKeyStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        let a = store.get("s1").unwrap();
        let b = store.get("s1").unwrap();
        let other = store.get("s2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn test_expired_session_gets_new_seed() {
        let store = SessionKeyStore::new(Arc::new(MemoryCache::new()), Duration::from_millis(30));
        let a = store.get("s1").unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let b = store.get("s1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_access_slides_expiry() {
        let store = SessionKeyStore::new(Arc::new(MemoryCache::new()), Duration::from_millis(80));
        let a = store.get("s1").unwrap();
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(40));
            assert_eq!(store.get("s1").unwrap(), a);
        }
    }

    #[test]
    fn test_existing_seed_wins_creation_race() {
        let cache = Arc::new(MemoryCache::new());
        let stored = SessionSeed::generate();
        cache.set(&keys::session("s1"), stored.as_bytes(), None).unwrap();

        let store = SessionKeyStore::new(cache, Duration::from_secs(60));
        assert_eq!(store.get("s1").unwrap(), stored);
    }

    #[test]
    fn test_seed_lapsing_during_renewal_is_stored_again() {
        let cache = Arc::new(LapsingCache::default());
        let store = SessionKeyStore::new(cache.clone(), Duration::from_secs(60));

        let created = store.get("s1").unwrap();
        let renewed = store.get("s1").unwrap();
        assert_eq!(renewed, created);
        assert_eq!(cache.get(&keys::session("s1")).unwrap().unwrap(), created.as_bytes());
        assert_eq!(store.get("s1").unwrap(), created);
    }

    #[test]
    fn test_rejects_empty_id_and_corrupt_seed() {
        let cache = Arc::new(MemoryCache::new());
        cache.set(&keys::session("bad"), b"short", None).unwrap();
        let store = SessionKeyStore::new(cache, Duration::from_secs(60));

        assert!(matches!(store.get(" "), Err(WalletError::InvalidSession(_))));
        assert!(matches!(store.get("bad"), Err(WalletError::Storage(_))));
    }

    #[test]
    fn test_debug_hides_seed() {
        let seed = SessionSeed::from_bytes(&[7u8; SESSION_SEED_LEN]).unwrap();
        assert_eq!(format!("{:?}", seed), "SessionSeed(..)");
        assert!(SessionSeed::from_bytes(&[1, 2, 3]).is_none());
    }
}
