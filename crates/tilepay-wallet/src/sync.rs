//! Chain synchronizer.
//!
//! Walks the node's main chain from the ledger cursor to the tip, one height
//! at a time. Each height's spends and credits are applied together with the
//! cursor update, so a crash mid-height is recovered by replaying it.

use crate::error::WalletError;
use std::sync::Arc;
use std::time::Duration;
use tilepay_rpc::NodeRpc;
use tilepay_store::{Ledger, LedgerOp};
use tilepay_types::DecodedTx;
use tokio::sync::{mpsc, watch};

/// Sync progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Sync pass started.
    Started { from_height: u64, target_height: u64 },
    /// Height applied.
    Height {
        height: u64,
        target_height: u64,
        credited: usize,
        spent: usize,
    },
    /// Caught up with the node.
    Complete { height: u64 },
}

pub struct ChainSynchronizer {
    node: Arc<dyn NodeRpc>,
    ledger: Arc<Ledger>,
    interval: Duration,
    start_height: u64,
}

impl ChainSynchronizer {
    pub fn new(node: Arc<dyn NodeRpc>, ledger: Arc<Ledger>, interval: Duration) -> Self {
        Self {
            node,
            ledger,
            interval,
            start_height: 0,
        }
    }

    /// First height to ingest when the ledger has no cursor yet.
    pub fn with_start_height(mut self, height: u64) -> Self {
        self.start_height = height;
        self
    }

    /// Next height to apply.
    fn next_height(&self) -> Result<u64, WalletError> {
        Ok(match self.ledger.processed_height()? {
            Some(cursor) => (cursor + 1).max(self.start_height),
            None => self.start_height,
        })
    }

    /// Apply every height between the cursor and the node's tip.
    ///
    /// Returns the cursor afterwards (`None` if nothing has been applied yet).
    pub async fn sync_once(
        &self,
        events: Option<&mpsc::Sender<SyncEvent>>,
    ) -> Result<Option<u64>, WalletError> {
        let best = self.node.best_height().await?;
        let from = self.next_height()?;

        if from > best {
            return Ok(self.ledger.processed_height()?);
        }

        log::info!("syncing heights {}..={}", from, best);
        if let Some(tx) = events {
            let _ = tx
                .send(SyncEvent::Started {
                    from_height: from,
                    target_height: best,
                })
                .await;
        }

        for height in from..=best {
            let (credited, spent) = self.sync_height(height).await?;

            if let Some(tx) = events {
                let _ = tx
                    .send(SyncEvent::Height {
                        height,
                        target_height: best,
                        credited,
                        spent,
                    })
                    .await;
            }
        }

        if let Some(tx) = events {
            let _ = tx.send(SyncEvent::Complete { height: best }).await;
        }

        Ok(Some(best))
    }

    /// Fetch, decode and apply one height.
    async fn sync_height(&self, height: u64) -> Result<(usize, usize), WalletError> {
        let hash = self.node.block_hash(height).await?;
        let txs = self.node.block(&hash).await?;
        log::debug!("syncing block {} {} ({} txs)", height, hash, txs.len());

        let mut ops = Vec::new();
        for tx in &txs {
            let decoded = self.node.decode_raw_transaction(tx).await?;
            self.collect_ops(&decoded, &mut ops)?;
        }

        let stats = self.ledger.apply_block(height, &ops)?;
        if stats.credited > 0 || stats.spent > 0 {
            log::info!(
                "block {}: credited {} outputs, marked {} spent",
                height,
                stats.credited,
                stats.spent
            );
        }
        Ok((stats.credited, stats.spent))
    }

    /// Spends first, then credits to known addresses.
    fn collect_ops(&self, decoded: &DecodedTx, ops: &mut Vec<LedgerOp>) -> Result<(), WalletError> {
        for outpoint in &decoded.inputs {
            ops.push(LedgerOp::Spend {
                outpoint: *outpoint,
                spending_txid: decoded.txid,
            });
        }

        for output in &decoded.outputs {
            for address in &output.addresses {
                if !self.ledger.is_known_address(address)? {
                    continue;
                }
                log::info!(
                    "address {} received {} from {}:{}",
                    address,
                    output.value,
                    decoded.txid,
                    output.index
                );
                ops.push(LedgerOp::Credit {
                    outpoint: bitcoin::OutPoint::new(decoded.txid, output.index),
                    address: address.clone(),
                    amount: output.value,
                });
                // An outpoint belongs to one row; the first known address owns it.
                break;
            }
        }
        Ok(())
    }

    /// Sync until `shutdown` flips to true.
    ///
    /// Node errors are logged and retried after the interval; storage errors
    /// end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WalletError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.sync_once(None).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("chain sync stopped: {}", e);
                    return Err(e);
                }
                Err(e) => log::warn!("chain sync pass failed, retrying: {}", e),
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
