//! UTXO ledger.
//!
//! Combines the durable [`LedgerDb`], which also holds the known-address set,
//! with the expiring [`Cache`] that holds provisional-spend markers and
//! coin-selection reservations. Selection reads both: a row is spendable only when it is
//! unspent in the table and neither marker is live for its outpoint.

use crate::cache::Cache;
use crate::db::{ApplyStats, LedgerDb, LedgerOp, UtxoEntry};
use crate::error::StoreError;
use crate::keys;
use bitcoin::{Amount, OutPoint, Txid};
use std::sync::Arc;
use std::time::Duration;

/// Outputs chosen by [`Ledger::unspent_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub entries: Vec<UtxoEntry>,
    /// Sum of the selected amounts.
    pub total: Amount,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            total: Amount::ZERO,
        }
    }
}

impl Selection {
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.entries.iter().map(|e| e.outpoint).collect()
    }

    pub fn covers(&self, target: Amount) -> bool {
        self.total >= target
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Ledger {
    db: LedgerDb,
    cache: Arc<dyn Cache>,
}

impl Ledger {
    pub fn new(db: LedgerDb, cache: Arc<dyn Cache>) -> Self {
        Self { db, cache }
    }

    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    // ── Selection ───────────────────────────────────────────────────────

    /// Spendable outputs of `address`, oldest first.
    ///
    /// With a target, accumulation stops as soon as the running total meets
    /// it; the caller checks [`Selection::covers`] to detect a shortfall.
    /// Without one, every spendable output is returned.
    pub fn unspent_for(
        &self,
        address: &str,
        target: Option<Amount>,
    ) -> Result<Selection, StoreError> {
        let mut selection = Selection::default();

        for entry in self.db.unspent_rows(address)? {
            if let Some(target) = target {
                if selection.covers(target) {
                    break;
                }
            }
            if self.is_provisionally_spent(&entry.outpoint)? || self.is_reserved(&entry.outpoint)? {
                continue;
            }
            selection.total += entry.amount;
            selection.entries.push(entry);
        }

        Ok(selection)
    }

    /// Sum of every spendable output of `address`.
    pub fn balance(&self, address: &str) -> Result<Amount, StoreError> {
        Ok(self.unspent_for(address, None)?.total)
    }

    // ── Ledger writes ───────────────────────────────────────────────────

    pub fn insert(
        &self,
        outpoint: &OutPoint,
        address: &str,
        amount: Amount,
        block_height: Option<u64>,
    ) -> Result<bool, StoreError> {
        self.db.insert(outpoint, address, amount, block_height)
    }

    pub fn mark_spent(
        &self,
        outpoint: &OutPoint,
        spending_txid: Option<&Txid>,
        spent_height: Option<u64>,
    ) -> Result<bool, StoreError> {
        self.db.mark_spent(outpoint, spending_txid, spent_height)
    }

    pub fn apply_block(&self, height: u64, ops: &[LedgerOp]) -> Result<ApplyStats, StoreError> {
        self.db.apply_block(height, ops)
    }

    pub fn processed_height(&self) -> Result<Option<u64>, StoreError> {
        self.db.processed_height()
    }

    // ── Known addresses ─────────────────────────────────────────────────

    /// Add an address to the known set. Returns whether it was new.
    pub fn register_address(&self, address: &str) -> Result<bool, StoreError> {
        self.db.register_address(address)
    }

    pub fn is_known_address(&self, address: &str) -> Result<bool, StoreError> {
        self.db.is_known_address(address)
    }

    pub fn known_address_count(&self) -> Result<u64, StoreError> {
        self.db.known_address_count()
    }

    // ── Markers ─────────────────────────────────────────────────────────

    /// Hide an output referenced by a pending transaction for `ttl`.
    /// Re-marking refreshes the lifetime.
    pub fn mark_provisional(&self, outpoint: &OutPoint, ttl: Duration) -> Result<(), StoreError> {
        self.cache.set(&keys::provisional_spend(outpoint), b"1", Some(ttl))
    }

    pub fn is_provisionally_spent(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        self.cache.exists(&keys::provisional_spend(outpoint))
    }

    /// Claim an output for an in-flight purchase. Returns false if another
    /// purchase holds it.
    pub fn reserve(&self, outpoint: &OutPoint, ttl: Duration) -> Result<bool, StoreError> {
        self.cache.set_nx(&keys::reservation(outpoint), b"1", Some(ttl))
    }

    pub fn release(&self, outpoint: &OutPoint) -> Result<(), StoreError> {
        self.cache.delete(&keys::reservation(outpoint))?;
        Ok(())
    }

    pub fn is_reserved(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        self.cache.exists(&keys::reservation(outpoint))
    }

    /// Drop expired markers from the cache backend.
    pub fn purge_expired(&self) -> Result<u64, StoreError> {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use bitcoin::hashes::Hash;
    use std::thread::sleep;

    fn outpoint(byte: u8, vout: u32) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([byte; 32]), vout)
    }

    fn ledger_with(amounts: &[u64]) -> Ledger {
        let ledger = Ledger::new(
            LedgerDb::open_in_memory().unwrap(),
            Arc::new(MemoryCache::new()),
        );
        for (i, sats) in amounts.iter().enumerate() {
            ledger
                .insert(&outpoint(i as u8 + 1, 0), "A", Amount::from_sat(*sats), Some(1))
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_greedy_stops_at_target() {
        let ledger = ledger_with(&[40, 30, 50, 10]);
        let sel = ledger.unspent_for("A", Some(Amount::from_sat(60))).unwrap();
        assert_eq!(sel.entries.len(), 2);
        assert_eq!(sel.total, Amount::from_sat(70));
        assert!(sel.covers(Amount::from_sat(60)));
        assert_eq!(sel.outpoints(), vec![outpoint(1, 0), outpoint(2, 0)]);
    }

    #[test]
    fn test_unbounded_returns_everything() {
        let ledger = ledger_with(&[40, 30, 50]);
        let sel = ledger.unspent_for("A", None).unwrap();
        assert_eq!(sel.entries.len(), 3);
        assert_eq!(ledger.balance("A").unwrap(), Amount::from_sat(120));
        assert_eq!(ledger.balance("nobody").unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_shortfall_is_visible() {
        let ledger = ledger_with(&[40, 30]);
        let sel = ledger.unspent_for("A", Some(Amount::from_sat(100))).unwrap();
        assert!(!sel.covers(Amount::from_sat(100)));
        assert_eq!(sel.total, Amount::from_sat(70));
    }

    #[test]
    fn test_provisional_marker_hides_until_expiry() {
        let ledger = ledger_with(&[40, 30]);
        ledger
            .mark_provisional(&outpoint(1, 0), Duration::from_millis(40))
            .unwrap();

        let sel = ledger.unspent_for("A", None).unwrap();
        assert_eq!(sel.outpoints(), vec![outpoint(2, 0)]);

        sleep(Duration::from_millis(80));
        let sel = ledger.unspent_for("A", None).unwrap();
        assert_eq!(sel.entries.len(), 2);
    }

    #[test]
    fn test_reservation_is_exclusive() {
        let ledger = ledger_with(&[40]);
        assert!(ledger.reserve(&outpoint(1, 0), Duration::from_secs(60)).unwrap());
        assert!(!ledger.reserve(&outpoint(1, 0), Duration::from_secs(60)).unwrap());
        assert!(ledger.unspent_for("A", None).unwrap().is_empty());

        ledger.release(&outpoint(1, 0)).unwrap();
        assert!(!ledger.is_reserved(&outpoint(1, 0)).unwrap());
        assert_eq!(ledger.balance("A").unwrap(), Amount::from_sat(40));
    }

    #[test]
    fn test_known_addresses() {
        let ledger = ledger_with(&[]);
        assert!(ledger.register_address("A").unwrap());
        assert!(!ledger.register_address("A").unwrap());
        assert!(ledger.is_known_address("A").unwrap());
        assert!(!ledger.is_known_address("B").unwrap());
        assert_eq!(ledger.known_address_count().unwrap(), 1);
    }
}
