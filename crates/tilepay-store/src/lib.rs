//! Persistence for tilepay.
//!
//! - [`LedgerDb`]: durable SQLite table of outputs paying known addresses,
//!   the known-address set itself, and the processed-height cursor.
//! - [`Cache`]: expiring key-value store ([`MemoryCache`] in-process,
//!   [`SqliteCache`] shared between processes).
//! - [`Ledger`]: the two combined, with marker-aware coin selection.

pub mod cache;
pub mod db;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod sqlite_cache;

pub use cache::{Cache, MemoryCache};
pub use db::{ApplyStats, LedgerDb, LedgerOp, UtxoEntry};
pub use error::StoreError;
pub use ledger::{Ledger, Selection};
pub use sqlite_cache::SqliteCache;
