//! SQLite-backed [`Cache`].
//!
//! Lets separate processes (the background monitor and short-lived request
//! handlers) share session seeds and markers through
//! one database file. Expiry is stored as a Unix timestamp in milliseconds.

use crate::cache::Cache;
use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CACHE_DDL: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key         TEXT PRIMARY KEY,
    value       BLOB NOT NULL,
    expires_at  INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
";

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn expiry(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64))
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CACHE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(StoreError::poisoned)
    }
}

impl Cache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_millis()],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expiry(now_millis(), ttl)],
        )?;
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let now = now_millis();
        // IMMEDIATE takes the write lock up front so two processes cannot both
        // observe the key as absent.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expiry(now, ttl)],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now = now_millis();
        let updated = conn.execute(
            "UPDATE kv SET expires_at = ?1
             WHERE key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
            params![expiry(now, Some(ttl)), key, now],
        )?;
        Ok(updated == 1)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now_millis()],
        )?;
        // Drop an expired row under the same key too.
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(deleted == 1)
    }

    fn purge_expired(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(deleted as u64)
    }
}
