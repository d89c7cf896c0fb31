//! Mempool watcher.
//!
//! Every poll, each output consumed by a pending transaction gets a
//! provisional-spend marker whose lifetime outlasts the poll interval, so an
//! output never looks spendable between two polls while its spender is still
//! unconfirmed. Once the spender confirms, the chain synchronizer marks the
//! output spent for good; if it is dropped, the marker simply expires.

use crate::error::WalletError;
use bitcoin::{OutPoint, Txid};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tilepay_rpc::NodeRpc;
use tilepay_store::Ledger;
use tokio::sync::watch;

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MempoolPass {
    /// Transactions reported by the node.
    pub pending: usize,
    /// Outpoints given a fresh marker.
    pub marked: usize,
    /// Transactions that could not be fetched this poll.
    pub failed: usize,
}

pub struct MempoolWatcher {
    node: Arc<dyn NodeRpc>,
    ledger: Arc<Ledger>,
    interval: Duration,
    marker_ttl: Duration,
    max_failures: u32,
    /// Consecutive fetch failures per pending hash.
    failures: HashMap<Txid, u32>,
    /// Inputs of pending transactions already fetched.
    inputs: HashMap<Txid, Vec<OutPoint>>,
}

impl MempoolWatcher {
    pub fn new(
        node: Arc<dyn NodeRpc>,
        ledger: Arc<Ledger>,
        interval: Duration,
        marker_ttl: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            node,
            ledger,
            interval,
            marker_ttl,
            max_failures,
            failures: HashMap::new(),
            inputs: HashMap::new(),
        }
    }

    pub fn failure_count(&self, txid: &Txid) -> u32 {
        self.failures.get(txid).copied().unwrap_or(0)
    }

    /// Pending transactions whose inputs are remembered.
    pub fn tracked(&self) -> usize {
        self.inputs.len()
    }

    /// Poll the mempool once and refresh markers.
    ///
    /// A hash that fails to fetch more than the configured number of
    /// consecutive times ends the pass with
    /// [`WalletError::MempoolFetchExhausted`].
    pub async fn poll_once(&mut self) -> Result<MempoolPass, WalletError> {
        let pending = self.node.raw_mempool().await?;
        let pending_set: HashSet<Txid> = pending.iter().copied().collect();

        // Forget hashes that left the mempool, confirmed or evicted.
        self.failures.retain(|txid, _| pending_set.contains(txid));
        self.inputs.retain(|txid, _| pending_set.contains(txid));

        let mut pass = MempoolPass {
            pending: pending.len(),
            ..Default::default()
        };

        for txid in pending {
            if !self.inputs.contains_key(&txid) {
                match self.node.raw_transaction(&txid).await {
                    Ok(tx) => {
                        self.failures.remove(&txid);
                        let spent: Vec<OutPoint> = tx
                            .input
                            .iter()
                            .map(|txin| txin.previous_output)
                            .filter(|outpoint| !outpoint.is_null())
                            .collect();
                        self.inputs.insert(txid, spent);
                    }
                    Err(e) => {
                        let count = self.failures.entry(txid).or_insert(0);
                        *count += 1;
                        log::warn!("mempool tx {} has failed {} times: {}", txid, count, e);
                        if *count > self.max_failures {
                            let failures = *count;
                            log::error!("giving up on mempool tx {}", txid);
                            return Err(WalletError::MempoolFetchExhausted { txid, failures });
                        }
                        pass.failed += 1;
                        continue;
                    }
                }
            }

            if let Some(spent) = self.inputs.get(&txid) {
                for outpoint in spent {
                    self.ledger.mark_provisional(outpoint, self.marker_ttl)?;
                    pass.marked += 1;
                    log::debug!("marked {} as spent in mempool by {}", outpoint, txid);
                }
            }
        }

        self.ledger.purge_expired()?;
        Ok(pass)
    }

    /// Poll until `shutdown` flips to true or a fatal error occurs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WalletError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.poll_once().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("mempool watcher stopped: {}", e);
                    return Err(e);
                }
                Err(e) => log::warn!("mempool poll failed, retrying: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
