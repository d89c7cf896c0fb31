//! Service-wide constants and defaults.

use std::time::Duration;

/// Length of a session derivation seed in bytes (BIP32 recommended length).
pub const SESSION_SEED_LEN: usize = 32;

/// Sliding expiry of a session seed.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Fixed per-transaction fee in base units (0.0001 coin).
pub const DEFAULT_FEE_SATS: u64 = 10_000;

/// Base units per whole coin.
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Poll interval of the chain synchronizer when caught up.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval of the mempool watcher.
pub const MEMPOOL_INTERVAL: Duration = Duration::from_secs(5);

/// Lifetime of a provisional-spend marker. Must exceed [`MEMPOOL_INTERVAL`].
pub const PROVISIONAL_SPEND_TTL: Duration = Duration::from_secs(7);

/// Consecutive fetch failures tolerated per mempool hash before escalation.
pub const MEMPOOL_MAX_FETCH_FAILURES: u32 = 2;

/// Lifetime of a coin-selection reservation.
pub const RESERVATION_TTL: Duration = Duration::from_secs(60);

/// Selection attempts before a purchase gives up on contended outpoints.
pub const MAX_SELECTION_ATTEMPTS: usize = 3;
