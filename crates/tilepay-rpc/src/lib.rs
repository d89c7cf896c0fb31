//! Node RPC client library.
//!
//! Provides an async JSON-RPC client for a bitcoind/btcd-compatible node and
//! the [`NodeRpc`] trait, the narrow surface the ledger and wallet consume.
//!
//! # Example
//!
//! ```ignore
//! use tilepay_rpc::{BtcNode, NodeRpc};
//!
//! #[tokio::main]
//! async fn main() {
//!     let node = BtcNode::new("http://127.0.0.1:18443").unwrap();
//!     let height = node.best_height().await.unwrap();
//!     println!("Height: {}", height);
//! }
//! ```

pub mod error;
pub mod client;
pub mod node;

pub use client::{Credentials, RpcClient, RpcConfig};
pub use error::RpcError;
pub use node::{BtcNode, NodeRpc};

/// Default RPC ports.
pub mod ports {
    pub const BITCOIND_REGTEST: u16 = 18443;
}
