//! Expiring key-value cache.
//!
//! Holds provisional-spend and reservation markers and session seeds. Every value may carry its own time-to-live; expired
//! entries behave exactly like absent ones.

use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operations the ledger and wallet need from a cache backend.
pub trait Cache: Send + Sync {
    /// Value of a live key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a value, replacing any previous one. `None` never expires.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Store a value only if the key is absent or expired. Returns whether it
    /// was stored.
    fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError>;

    /// Reset the time-to-live of a live key. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove a key. Returns whether a live key was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Drop expired keys from the backing storage. Returns how many were dropped.
    fn purge_expired(&self) -> Result<u64, StoreError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Entry>,
}

/// Process-local cache. Suitable when the monitor and the request handlers
/// share one process, and for tests.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(StoreError::poisoned)
    }
}

fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| now + ttl)
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state
            .values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        if state.values.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(true)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        match state.values.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state.values.get(key).is_some_and(|e| e.is_live(now)))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        Ok(state.values.remove(key).is_some_and(|e| e.is_live(now)))
    }

    fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let before = state.values.len();
        state.values.retain(|_, e| e.is_live(now));
        Ok((before - state.values.len()) as u64)
    }
}
