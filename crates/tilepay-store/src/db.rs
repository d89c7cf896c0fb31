//! Durable UTXO table, known-address set and processed-height cursor.
//!
//! Rows are only ever inserted or flipped to spent; nothing is deleted. Both
//! writes are idempotent, so replaying a height after a crash converges on the
//! same table contents. The known-address set lives in the same file as the
//! cursor: a sync pass must never advance past a block while the addresses it
//! pays are unknown to it.

use crate::error::StoreError;
use bitcoin::{Amount, OutPoint, Txid};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS utxos (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    txid          TEXT NOT NULL,
    vout          INTEGER NOT NULL,
    address       TEXT NOT NULL,
    amount_sats   INTEGER NOT NULL,
    block_height  INTEGER,
    spent         INTEGER NOT NULL DEFAULT 0,
    spent_txid    TEXT,
    spent_height  INTEGER,
    UNIQUE (txid, vout)
);

CREATE INDEX IF NOT EXISTS idx_utxos_address ON utxos(address, spent);

CREATE TABLE IF NOT EXISTS known_addresses (
    address  TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const CURSOR_KEY: &str = "last_synced_block";

const UTXO_COLUMNS: &str =
    "id, txid, vout, address, amount_sats, block_height, spent, spent_txid, spent_height";

/// A tracked output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    /// Insertion order.
    pub id: i64,
    pub outpoint: OutPoint,
    pub address: String,
    pub amount: Amount,
    /// Height of the block that created the output, if known.
    pub block_height: Option<u64>,
    pub spent: bool,
    pub spent_txid: Option<Txid>,
    pub spent_height: Option<u64>,
}

/// One ledger write within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    /// An input of `spending_txid` consumed `outpoint`.
    Spend { outpoint: OutPoint, spending_txid: Txid },
    /// An output paying a known address.
    Credit {
        outpoint: OutPoint,
        address: String,
        amount: Amount,
    },
}

/// Rows actually changed by [`LedgerDb::apply_block`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub credited: usize,
    pub spent: usize,
}

pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self::init(conn)?;
        log::debug!(
            "opened ledger {} (cursor {:?})",
            path,
            db.processed_height()?
        );
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(LedgerDb {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(StoreError::poisoned)
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Insert an output. Returns false if the outpoint is already tracked.
    pub fn insert(
        &self,
        outpoint: &OutPoint,
        address: &str,
        amount: Amount,
        block_height: Option<u64>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        insert_row(&conn, outpoint, address, amount, block_height)
    }

    /// Flip an output to spent. Returns false if it is untracked or already spent.
    pub fn mark_spent(
        &self,
        outpoint: &OutPoint,
        spending_txid: Option<&Txid>,
        spent_height: Option<u64>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        mark_row_spent(&conn, outpoint, spending_txid, spent_height)
    }

    /// Apply one height's writes, in order, and advance the cursor to
    /// `height`, all in a single transaction with the cursor written last.
    pub fn apply_block(&self, height: u64, ops: &[LedgerOp]) -> Result<ApplyStats, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut stats = ApplyStats::default();

        for op in ops {
            match op {
                LedgerOp::Spend {
                    outpoint,
                    spending_txid,
                } => {
                    if mark_row_spent(&tx, outpoint, Some(spending_txid), Some(height))? {
                        stats.spent += 1;
                    }
                }
                LedgerOp::Credit {
                    outpoint,
                    address,
                    amount,
                } => {
                    if insert_row(&tx, outpoint, address, *amount, Some(height))? {
                        stats.credited += 1;
                    }
                }
            }
        }

        advance_cursor(&tx, height)?;
        tx.commit()?;
        if stats.credited > 0 || stats.spent > 0 {
            log::debug!(
                "height {}: {} credited, {} spent",
                height,
                stats.credited,
                stats.spent
            );
        }
        Ok(stats)
    }

    /// Add an address to the known set. Returns whether it was new.
    pub fn register_address(&self, address: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO known_addresses (address) VALUES (?1)",
            params![address],
        )?;
        Ok(inserted == 1)
    }

    /// Move the cursor forward without applying any writes.
    pub fn set_processed_height(&self, height: u64) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        advance_cursor(&tx, height)?;
        tx.commit()?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Last fully applied height, or `None` before the first block.
    pub fn processed_height(&self) -> Result<Option<u64>, StoreError> {
        let conn = self.lock()?;
        read_cursor(&conn)
    }

    pub fn entry(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM utxos WHERE txid = ?1 AND vout = ?2", UTXO_COLUMNS),
                params![outpoint.txid.to_string(), outpoint.vout],
                read_row,
            )
            .optional()?;
        row.transpose()
    }

    /// Unspent rows of `address` in insertion order.
    pub fn unspent_rows(&self, address: &str) -> Result<Vec<UtxoEntry>, StoreError> {
        self.query_rows(
            &format!(
                "SELECT {} FROM utxos WHERE address = ?1 AND spent = 0 ORDER BY id",
                UTXO_COLUMNS
            ),
            address,
        )
    }

    /// Every row of `address`, spent or not, in insertion order.
    pub fn entries_for(&self, address: &str) -> Result<Vec<UtxoEntry>, StoreError> {
        self.query_rows(
            &format!("SELECT {} FROM utxos WHERE address = ?1 ORDER BY id", UTXO_COLUMNS),
            address,
        )
    }

    pub fn is_known_address(&self, address: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM known_addresses WHERE address = ?1",
                params![address],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn known_address_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM known_addresses", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn unspent_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM utxos WHERE spent = 0", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn query_rows(&self, sql: &str, address: &str) -> Result<Vec<UtxoEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![address], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

fn insert_row(
    conn: &Connection,
    outpoint: &OutPoint,
    address: &str,
    amount: Amount,
    block_height: Option<u64>,
) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO utxos (txid, vout, address, amount_sats, block_height)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            outpoint.txid.to_string(),
            outpoint.vout,
            address,
            amount.to_sat() as i64,
            block_height.map(|h| h as i64),
        ],
    )?;
    Ok(inserted == 1)
}

fn mark_row_spent(
    conn: &Connection,
    outpoint: &OutPoint,
    spending_txid: Option<&Txid>,
    spent_height: Option<u64>,
) -> Result<bool, StoreError> {
    let updated = conn.execute(
        "UPDATE utxos SET spent = 1, spent_txid = ?1, spent_height = ?2
         WHERE txid = ?3 AND vout = ?4 AND spent = 0",
        params![
            spending_txid.map(|t| t.to_string()),
            spent_height.map(|h| h as i64),
            outpoint.txid.to_string(),
            outpoint.vout,
        ],
    )?;
    Ok(updated == 1)
}

fn read_cursor(conn: &Connection) -> Result<Option<u64>, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![CURSOR_KEY],
            |r| r.get(0),
        )
        .optional()?;
    value
        .map(|v| v.parse::<u64>().map_err(|e| StoreError::corrupt("cursor", e)))
        .transpose()
}

/// The cursor never moves backwards.
fn advance_cursor(tx: &Transaction<'_>, height: u64) -> Result<(), StoreError> {
    if read_cursor(tx)?.is_some_and(|current| current >= height) {
        return Ok(());
    }
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![CURSOR_KEY, height.to_string()],
    )?;
    Ok(())
}

fn read_row(r: &Row<'_>) -> rusqlite::Result<Result<UtxoEntry, StoreError>> {
    let id: i64 = r.get(0)?;
    let txid: String = r.get(1)?;
    let vout: u32 = r.get(2)?;
    let address: String = r.get(3)?;
    let amount_sats: i64 = r.get(4)?;
    let block_height: Option<i64> = r.get(5)?;
    let spent: bool = r.get(6)?;
    let spent_txid: Option<String> = r.get(7)?;
    let spent_height: Option<i64> = r.get(8)?;

    Ok(build_entry(
        id,
        &txid,
        vout,
        address,
        amount_sats,
        block_height,
        spent,
        spent_txid,
        spent_height,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    id: i64,
    txid: &str,
    vout: u32,
    address: String,
    amount_sats: i64,
    block_height: Option<i64>,
    spent: bool,
    spent_txid: Option<String>,
    spent_height: Option<i64>,
) -> Result<UtxoEntry, StoreError> {
    let txid = Txid::from_str(txid).map_err(|e| StoreError::corrupt("txid", e))?;
    let amount_sats =
        u64::try_from(amount_sats).map_err(|e| StoreError::corrupt("amount_sats", e))?;
    let spent_txid = spent_txid
        .map(|t| Txid::from_str(&t).map_err(|e| StoreError::corrupt("spent_txid", e)))
        .transpose()?;

    Ok(UtxoEntry {
        id,
        outpoint: OutPoint::new(txid, vout),
        address,
        amount: Amount::from_sat(amount_sats),
        block_height: block_height.map(|h| h as u64),
        spent,
        spent_txid,
        spent_height: spent_height.map(|h| h as u64),
    })
}
