//! In-process node double and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, BlockHash, Network, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tilepay_rpc::error::codes;
use tilepay_rpc::{NodeRpc, RpcError};
use tilepay_store::{Cache, Ledger, LedgerDb, MemoryCache, StoreError};
use tilepay_types::{AddressKind, DecodedTx};
use tilepay_wallet::{SessionKeyStore, WalletParams, WalletService};

pub const FEE_SATS: u64 = 10_000;


#[derive(Default)]
struct FakeState {
    blocks: Vec<(BlockHash, Vec<Transaction>)>,
    mempool: Vec<Txid>,
    txs: HashMap<Txid, Transaction>,
    failing_fetch: HashSet<Txid>,
    failing_decode: HashSet<Txid>,
    broadcasts: Vec<Transaction>,
    reject_broadcasts: bool,
    lose_broadcasts: bool,
    offline: bool,
}

/// Synthetic chain and mempool served through [`NodeRpc`].
pub struct FakeNode {
    network: Network,
    state: Mutex<FakeState>,
}

impl FakeNode {
    pub fn new() -> Self {
        Self {
            network: Network::Regtest,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Append a block; returns its height.
    pub fn push_block(&self, txs: Vec<Transaction>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let height = state.blocks.len() as u64;
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&(height + 1).to_le_bytes());
        for tx in &txs {
            let txid = tx.compute_txid();
            state.mempool.retain(|t| *t != txid);
            state.txs.insert(txid, tx.clone());
        }
        state.blocks.push((BlockHash::from_byte_array(hash), txs));
        height
    }

    pub fn add_to_mempool(&self, tx: Transaction) -> Txid {
        let mut state = self.state.lock().unwrap();
        let txid = tx.compute_txid();
        state.txs.insert(txid, tx);
        state.mempool.push(txid);
        txid
    }

    pub fn remove_from_mempool(&self, txid: &Txid) {
        self.state.lock().unwrap().mempool.retain(|t| t != txid);
    }

    pub fn set_fetch_failing(&self, txid: Txid, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_fetch.insert(txid);
        } else {
            state.failing_fetch.remove(&txid);
        }
    }

    pub fn set_decode_failing(&self, txid: Txid, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_decode.insert(txid);
        } else {
            state.failing_decode.remove(&txid);
        }
    }

    pub fn set_reject_broadcasts(&self, reject: bool) {
        self.state.lock().unwrap().reject_broadcasts = reject;
    }

    /// Broadcasts fail in transit after the node has accepted them.
    pub fn set_lose_broadcasts(&self, lose: bool) {
        self.state.lock().unwrap().lose_broadcasts = lose;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    fn check_online(state: &FakeState) -> Result<(), RpcError> {
        if state.offline {
            return Err(RpcError::Other("connection refused".into()));
        }
        Ok(())
    }

    fn not_found(method: &str) -> RpcError {
        RpcError::Rpc {
            code: codes::INVALID_ADDRESS_OR_KEY,
            message: "No such mempool or blockchain transaction".into(),
            method: method.into(),
        }
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn best_height(&self) -> Result<u64, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.blocks.is_empty() {
            return Err(RpcError::Other("no blocks".into()));
        }
        Ok(state.blocks.len() as u64 - 1)
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state
            .blocks
            .get(height as usize)
            .map(|(hash, _)| *hash)
            .ok_or_else(|| RpcError::Rpc {
                code: -8,
                message: "Block height out of range".into(),
                method: "getblockhash".into(),
            })
    }

    async fn block(&self, hash: &BlockHash) -> Result<Vec<Transaction>, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state
            .blocks
            .iter()
            .find(|(h, _)| h == hash)
            .map(|(_, txs)| txs.clone())
            .ok_or_else(|| Self::not_found("getblock"))
    }

    async fn raw_mempool(&self) -> Result<Vec<Txid>, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(state.mempool.clone())
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.failing_fetch.contains(txid) {
            return Err(Self::not_found("getrawtransaction"));
        }
        state
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| Self::not_found("getrawtransaction"))
    }

    async fn decode_raw_transaction(&self, tx: &Transaction) -> Result<DecodedTx, RpcError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.failing_decode.contains(&tx.compute_txid()) {
            return Err(RpcError::Other("decode failed".into()));
        }
        Ok(DecodedTx::from_transaction(tx, self.network))
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.reject_broadcasts {
            return Err(RpcError::Rpc {
                code: codes::VERIFY_REJECTED,
                message: "bad-txns-inputs-missingorspent".into(),
                method: "sendrawtransaction".into(),
            });
        }
        let txid = tx.compute_txid();
        state.broadcasts.push(tx.clone());
        state.txs.insert(txid, tx.clone());
        state.mempool.push(txid);
        if state.lose_broadcasts {
            return Err(RpcError::Other("connection reset by peer".into()));
        }
        Ok(txid)
    }
}

// ─── Racing cache ───────────────────────────────────────────────────────────

/// Cache in which another purchase wins some reservations.
///
/// Reservation attempts are numbered from 1. For each number in `lost`, the
/// competitor reserves the outpoint just before this process tries to, as if
/// it had raced in between selection and reservation.
pub struct RacingCache {
    inner: MemoryCache,
    lost: HashSet<usize>,
    attempts: AtomicUsize,
}

impl RacingCache {
    pub fn new(lost: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryCache::new(),
            lost: lost.into_iter().collect(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn reservation_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Cache for RacingCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        self.inner.set(key, value, ttl)
    }

    fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
        if key.starts_with("reserved:") {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.lost.contains(&attempt) {
                self.inner.set_nx(key, b"competitor", ttl)?;
            }
        }
        self.inner.set_nx(key, value, ttl)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
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

// ─── Transactions ───────────────────────────────────────────────────────────

static NONCE: AtomicU32 = AtomicU32::new(1);

fn fresh_outpoint() -> OutPoint {
    let n = NONCE.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0xEEu8; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    OutPoint::new(Txid::from_byte_array(bytes), 0)
}

pub fn sats(n: u64) -> Amount {
    Amount::from_sat(n)
}

pub fn coins(n: f64) -> Amount {
    Amount::from_btc(n).unwrap()
}

/// Regtest address nobody in the tests holds a key for.
pub fn external_address(tag: u8) -> Address {
    Address::p2pkh(PubkeyHash::from_byte_array([tag; 20]), Network::Regtest)
}

fn txin(outpoint: OutPoint) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::default(),
    }
}

/// Transaction spending `inputs` into `outputs`.
pub fn spend_tx(inputs: &[OutPoint], outputs: &[(&Address, Amount)]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: inputs.iter().copied().map(txin).collect(),
        output: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: *value,
                script_pubkey: address.script_pubkey(),
            })
            .collect(),
    }
}

/// Transaction paying `outputs` from an outpoint outside the ledger.
pub fn funding_tx(outputs: &[(&Address, Amount)]) -> Transaction {
    spend_tx(&[fresh_outpoint()], outputs)
}

/// Coinbase-shaped transaction (null input) paying `outputs`.
pub fn coinbase_tx(outputs: &[(&Address, Amount)]) -> Transaction {
    let mut tx = spend_tx(&[OutPoint::null()], outputs);
    let n = NONCE.fetch_add(1, Ordering::Relaxed);
    tx.input[0].script_sig = ScriptBuf::from_bytes(n.to_le_bytes().to_vec());
    tx
}

// ─── Service fixture ────────────────────────────────────────────────────────

pub struct Harness {
    pub node: Arc<FakeNode>,
    pub cache: Arc<dyn Cache>,
    pub ledger: Arc<Ledger>,
    pub service: WalletService,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MemoryCache::new()), Duration::from_secs(3600))
}

pub fn harness_with(cache: Arc<dyn Cache>, session_ttl: Duration) -> Harness {
    let node = Arc::new(FakeNode::new());
    let ledger = Arc::new(Ledger::new(LedgerDb::open_in_memory().unwrap(), cache.clone()));
    let sessions = Arc::new(SessionKeyStore::new(cache.clone(), session_ttl));
    let params = WalletParams {
        network: Network::Regtest,
        kind: AddressKind::P2pkh,
    };
    let service = WalletService::new(
        node.clone(),
        ledger.clone(),
        sessions,
        params,
        sats(FEE_SATS),
    );
    Harness {
        node,
        cache,
        ledger,
        service,
    }
}

impl Harness {
    pub fn synchronizer(&self) -> tilepay_wallet::ChainSynchronizer {
        tilepay_wallet::ChainSynchronizer::new(
            self.node.clone(),
            self.ledger.clone(),
            Duration::from_millis(10),
        )
    }

    pub fn watcher(&self, marker_ttl: Duration) -> tilepay_wallet::MempoolWatcher {
        tilepay_wallet::MempoolWatcher::new(
            self.node.clone(),
            self.ledger.clone(),
            Duration::from_millis(10),
            marker_ttl,
            2,
        )
    }

    /// Mine a block and sync it into the ledger.
    pub async fn mine(&self, txs: Vec<Transaction>) -> u64 {
        let height = self.node.push_block(txs);
        self.synchronizer().sync_once(None).await.unwrap();
        height
    }
}
