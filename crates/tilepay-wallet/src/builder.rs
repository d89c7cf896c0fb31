//! Purchase transactions.
//!
//! Selects the oldest spendable outputs of a source address, pays the
//! requested amount less the fixed fee to the destination, returns any
//! remainder above the fee to the source, signs and broadcasts.
//!
//! Selected outputs are reserved in the cache for the duration of the build
//! so concurrent purchases from the same address pick disjoint inputs.

use crate::error::WalletError;
use crate::manager::WalletManager;
use crate::sign::{sign_inputs, InputToSign};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::time::Duration;
use tilepay_rpc::NodeRpc;
use tilepay_store::{Ledger, Selection};
use tilepay_types::address::parse_address;
use tilepay_types::constants::{MAX_SELECTION_ATTEMPTS, RESERVATION_TTL};

/// Amounts of a planned purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchasePlan {
    /// Sum of the selected inputs.
    pub total: Amount,
    /// Paid to the destination.
    pub payment: Amount,
    /// Returned to the source, if above the fee.
    pub change: Option<Amount>,
    /// What the miner receives.
    pub fee: Amount,
}

impl PurchasePlan {
    /// Split `total` selected for a purchase of `amount` with a fixed `fee`.
    pub fn new(total: Amount, amount: Amount, fee: Amount) -> Result<Self, WalletError> {
        let payment = amount.checked_sub(fee).filter(|p| *p > Amount::ZERO).ok_or_else(|| {
            WalletError::InvalidAmount(format!("amount {} does not cover the fee {}", amount, fee))
        })?;
        if total < amount {
            return Err(WalletError::InsufficientFunds {
                need: amount,
                have: total,
            });
        }

        let remainder = total - amount;
        let change = (remainder > fee).then_some(remainder);
        let fee = total - payment - change.unwrap_or(Amount::ZERO);
        Ok(Self {
            total,
            payment,
            change,
            fee,
        })
    }
}

pub struct TransactionBuilder<'a> {
    node: &'a dyn NodeRpc,
    ledger: &'a Ledger,
    wallet: &'a WalletManager,
    fee: Amount,
    reservation_ttl: Duration,
    max_attempts: usize,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(
        node: &'a dyn NodeRpc,
        ledger: &'a Ledger,
        wallet: &'a WalletManager,
        fee: Amount,
    ) -> Self {
        Self {
            node,
            ledger,
            wallet,
            fee,
            reservation_ttl: RESERVATION_TTL,
            max_attempts: MAX_SELECTION_ATTEMPTS,
        }
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Pay `amount - fee` from `source` to `destination` and broadcast.
    pub async fn perform_purchase(
        &self,
        source: &str,
        amount: Amount,
        destination: &str,
    ) -> Result<Txid, WalletError> {
        let network = self.wallet.params().network;
        let source_address = parse_address(source, network)?;
        let destination_address = parse_address(destination, network)?;
        let source = source_address.to_string();
        self.wallet.key_for(&source)?;
        if amount <= self.fee {
            return Err(WalletError::InvalidAmount(format!(
                "amount {} does not cover the fee {}",
                amount, self.fee
            )));
        }

        let selection = self.select_and_reserve(&source, amount)?;
        let outpoints = selection.outpoints();

        let tx = match self
            .build_signed(&selection, amount, &source_address, &destination_address)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                self.release(&outpoints);
                return Err(e);
            }
        };

        match self.node.send_raw_transaction(&tx).await {
            Ok(txid) => {
                log::info!(
                    "broadcast {} paying {} to {} from {} inputs of {}",
                    txid,
                    tx.output[0].value,
                    destination_address,
                    outpoints.len(),
                    source
                );
                Ok(txid)
            }
            Err(e) => {
                // A rejected transaction frees its inputs. A transport failure
                // leaves them reserved since the node may have relayed it.
                if e.is_rejection() {
                    self.release(&outpoints);
                }
                log::warn!("broadcast from {} failed: {}", source, e);
                Err(e.into())
            }
        }
    }

    /// Greedy selection, then a reservation on every chosen outpoint.
    fn select_and_reserve(&self, source: &str, amount: Amount) -> Result<Selection, WalletError> {
        for attempt in 1..=self.max_attempts {
            let selection = self.ledger.unspent_for(source, Some(amount))?;
            if !selection.covers(amount) {
                return Err(WalletError::InsufficientFunds {
                    need: amount,
                    have: selection.total,
                });
            }

            let mut taken = Vec::with_capacity(selection.entries.len());
            let mut contended = false;
            for entry in &selection.entries {
                if self.ledger.reserve(&entry.outpoint, self.reservation_ttl)? {
                    taken.push(entry.outpoint);
                } else {
                    contended = true;
                    break;
                }
            }

            if !contended {
                return Ok(selection);
            }
            log::debug!("selection for {} contended on attempt {}", source, attempt);
            self.release(&taken);
        }

        Err(WalletError::SelectionContention {
            address: source.to_string(),
        })
    }

    async fn build_signed(
        &self,
        selection: &Selection,
        amount: Amount,
        source: &Address,
        destination: &Address,
    ) -> Result<Transaction, WalletError> {
        let plan = PurchasePlan::new(selection.total, amount, self.fee)?;

        let mut output = vec![TxOut {
            value: plan.payment,
            script_pubkey: destination.script_pubkey(),
        }];
        if let Some(change) = plan.change {
            output.push(TxOut {
                value: change,
                script_pubkey: source.script_pubkey(),
            });
        }

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: selection
                .entries
                .iter()
                .map(|entry| TxIn {
                    previous_output: entry.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::default(),
                })
                .collect(),
            output,
        };

        let mut inputs = Vec::with_capacity(selection.entries.len());
        for entry in &selection.entries {
            let key = self.wallet.key_for(&entry.address)?;
            let script_pubkey = self.funding_script(&entry.outpoint).await?;
            inputs.push(InputToSign {
                outpoint: entry.outpoint,
                script_pubkey,
                value: entry.amount,
                key,
            });
        }

        sign_inputs(self.wallet.secp(), &mut tx, &inputs)?;
        Ok(tx)
    }

    /// Locking script of a spent output, from its funding transaction.
    async fn funding_script(&self, outpoint: &OutPoint) -> Result<ScriptBuf, WalletError> {
        let funding = self.node.raw_transaction(&outpoint.txid).await?;
        funding
            .output
            .get(outpoint.vout as usize)
            .map(|txout| txout.script_pubkey.clone())
            .ok_or_else(|| WalletError::UnsupportedScript {
                outpoint: *outpoint,
                reason: format!("funding transaction has {} outputs", funding.output.len()),
            })
    }

    fn release(&self, outpoints: &[OutPoint]) {
        for outpoint in outpoints {
            if let Err(e) = self.ledger.release(outpoint) {
                log::warn!("failed to release reservation on {}: {}", outpoint, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sats(n: u64) -> Amount {
        Amount::from_sat(n)
    }

    #[test]
    fn test_plan_with_change() {
        let plan = PurchasePlan::new(sats(100_000_000), sats(50_000_000), sats(10_000)).unwrap();
        assert_eq!(plan.payment, sats(49_990_000));
        assert_eq!(plan.change, Some(sats(50_000_000)));
        assert_eq!(plan.fee, sats(10_000));
    }

    #[test]
    fn test_plan_absorbs_small_remainder() {
        let plan = PurchasePlan::new(sats(50_005_000), sats(50_000_000), sats(10_000)).unwrap();
        assert_eq!(plan.change, None);
        assert_eq!(plan.payment, sats(49_990_000));
        assert_eq!(plan.fee, sats(15_000));

        let exact = PurchasePlan::new(sats(50_010_000), sats(50_000_000), sats(10_000)).unwrap();
        assert_eq!(exact.change, None);
    }

    #[test]
    fn test_plan_rejects_amount_below_fee() {
        assert!(matches!(
            PurchasePlan::new(sats(100_000), sats(10_000), sats(10_000)),
            Err(WalletError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_plan_rejects_short_total() {
        assert!(matches!(
            PurchasePlan::new(sats(40_000), sats(50_000), sats(10_000)),
            Err(WalletError::InsufficientFunds { .. })
        ));
    }
}
