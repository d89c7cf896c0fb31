//! Cache key layout.
//!
//! Every key the ledger and wallet place in the expiring cache is built here
//! so the monitor process and request handlers agree on names.

use bitcoin::OutPoint;

/// Marker for an output spent by a transaction still in the mempool.
pub fn provisional_spend(outpoint: &OutPoint) -> String {
    format!("mempool_spent:{}:{}", outpoint.txid, outpoint.vout)
}

/// Marker for an output chosen by an in-flight purchase.
pub fn reservation(outpoint: &OutPoint) -> String {
    format!("reserved:{}:{}", outpoint.txid, outpoint.vout)
}

/// Derivation seed of a session.
pub fn session(session_id: &str) -> String {
    format!("session:{}", session_id)
}
