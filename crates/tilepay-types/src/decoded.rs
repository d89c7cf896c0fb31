//! Decoded transaction model.
//!
//! The shape a node's `decoderawtransaction` yields, reduced to what the
//! ledger needs: the transaction id, the outpoints its inputs spend, and the
//! value and destination addresses of each output.

use crate::address::script_addresses;
use bitcoin::{Amount, Network, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};

/// A single decoded output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    /// Position of the output within its transaction.
    pub index: u32,
    /// Output value in base units.
    pub value: Amount,
    /// Addresses the output pays to; empty for non-standard scripts.
    pub addresses: Vec<String>,
}

/// A decoded transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTx {
    pub txid: Txid,
    /// Outpoints consumed by the inputs. Coinbase inputs are omitted.
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<DecodedOutput>,
}

impl DecodedTx {
    /// Decode a transaction locally, resolving output addresses for `network`.
    pub fn from_transaction(tx: &Transaction, network: Network) -> Self {
        let inputs = tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .filter(|outpoint| !outpoint.is_null())
            .collect();

        let outputs = tx
            .output
            .iter()
            .enumerate()
            .map(|(i, txout)| DecodedOutput {
                index: i as u32,
                value: txout.value,
                addresses: script_addresses(&txout.script_pubkey, network),
            })
            .collect();

        Self {
            txid: tx.compute_txid(),
            inputs,
            outputs,
        }
    }

    /// Whether this transaction only creates coins.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }
}
