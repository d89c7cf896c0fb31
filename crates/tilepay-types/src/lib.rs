//! Core types shared across the tilepay crates.
//!
//! Network and address parameters, base-unit amount helpers, the decoded
//! transaction model the ledger consumes, and service-wide constants.

pub mod address;
pub mod amount;
pub mod constants;
pub mod decoded;

pub use address::{AddressError, AddressKind};
pub use amount::AmountError;
pub use decoded::{DecodedOutput, DecodedTx};

pub use bitcoin::{Address, Amount, Network, OutPoint, Transaction, Txid};
