//! tilepay wallet core.
//!
//! Keeps a ledger of outputs paying session addresses in step with the chain
//! and mempool, derives per-session keys from cached seeds, and builds,
//! signs and broadcasts purchases.

pub mod builder;
pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod mempool;
pub mod service;
pub mod session;
pub mod sign;
pub mod sync;

pub use builder::{PurchasePlan, TransactionBuilder};
pub use config::{NodeConfig, ServiceConfig};
pub use error::WalletError;
pub use keys::{derive_keys, DerivedKey};
pub use manager::{WalletManager, WalletParams};
pub use mempool::{MempoolPass, MempoolWatcher};
pub use service::{Monitor, SessionWallet, WalletService};
pub use session::{SessionKeyStore, SessionSeed};
pub use sync::{ChainSynchronizer, SyncEvent};
