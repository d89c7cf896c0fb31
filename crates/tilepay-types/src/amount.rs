//! Conversions between decimal coin values and base units.
//!
//! The ledger only ever stores base units; decimal values appear at the node
//! RPC boundary and in the command-line interface.

use crate::constants::SATS_PER_COIN;
use bitcoin::{Amount, Denomination};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmountError {
    #[error("invalid amount {input}: {reason}")]
    Invalid { input: String, reason: String },
}

/// Parse a decimal coin string such as `"0.5"` or `"1.00000000"`.
pub fn parse_coin_amount(input: &str) -> Result<Amount, AmountError> {
    Amount::from_str_in(input.trim(), Denomination::Bitcoin).map_err(|e| AmountError::Invalid {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Convert a decimal coin value as reported by a node's JSON interface.
pub fn coin_value_to_amount(value: f64) -> Result<Amount, AmountError> {
    Amount::from_btc(value).map_err(|e| AmountError::Invalid {
        input: value.to_string(),
        reason: e.to_string(),
    })
}

/// Format base units as a fixed eight-decimal coin string.
pub fn format_coin(amount: Amount) -> String {
    let sats = amount.to_sat();
    format!("{}.{:08}", sats / SATS_PER_COIN, sats % SATS_PER_COIN)
}
