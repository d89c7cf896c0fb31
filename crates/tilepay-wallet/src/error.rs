//! Wallet error types.

use bitcoin::{Amount, OutPoint, Txid};
use thiserror::Error;
use tilepay_rpc::RpcError;
use tilepay_store::StoreError;
use tilepay_types::AddressError;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("node error: {0}")]
    Node(#[from] RpcError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: Amount, have: Amount },

    #[error("no key held for address {0}")]
    KeyNotFound(String),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid session id: {0}")]
    InvalidSession(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("cannot spend {outpoint}: {reason}")]
    UnsupportedScript { outpoint: OutPoint, reason: String },

    #[error("mempool transaction {txid} could not be fetched after {failures} attempts")]
    MempoolFetchExhausted { txid: Txid, failures: u32 },

    #[error("outputs of {address} are held by concurrent purchases")]
    SelectionContention { address: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl WalletError {
    /// Machine-readable reason for callers outside the wallet.
    pub fn reason(&self) -> &'static str {
        match self {
            WalletError::Node(_) => "node_unavailable",
            WalletError::Storage(_) => "storage_failure",
            WalletError::InsufficientFunds { .. } => "insufficient_funds",
            WalletError::KeyNotFound(_) => "key_not_found",
            WalletError::InvalidAddress(_) => "invalid_address",
            WalletError::InvalidAmount(_) => "invalid_amount",
            WalletError::InvalidSession(_) => "invalid_session",
            WalletError::KeyDerivation(_) => "key_derivation_failed",
            WalletError::Signing(_) => "signing_failed",
            WalletError::UnsupportedScript { .. } => "unsupported_script",
            WalletError::MempoolFetchExhausted { .. } => "mempool_fetch_exhausted",
            WalletError::SelectionContention { .. } => "selection_contention",
            WalletError::Config(_) => "invalid_config",
        }
    }

    /// Whether a background task must stop instead of retrying next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WalletError::Storage(_) | WalletError::MempoolFetchExhausted { .. }
        )
    }
}
