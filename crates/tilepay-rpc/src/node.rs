//! Node RPC surface.
//!
//! [`NodeRpc`] is the narrow set of node calls the chain synchronizer,
//! mempool watcher and transaction builder depend on. [`BtcNode`] implements
//! it over JSON-RPC against bitcoind or btcd; tests substitute their own
//! implementation.

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Transaction, Txid};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tilepay_types::amount::coin_value_to_amount;
use tilepay_types::{DecodedOutput, DecodedTx};

/// Node calls consumed by the ledger and wallet.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Height of the node's best chain tip.
    async fn best_height(&self) -> Result<u64, RpcError>;

    /// Hash of the main-chain block at `height`.
    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError>;

    /// Transactions of a block, in block order.
    async fn block(&self, hash: &BlockHash) -> Result<Vec<Transaction>, RpcError>;

    /// Hashes of the transactions currently in the node's mempool.
    async fn raw_mempool(&self) -> Result<Vec<Txid>, RpcError>;

    /// A transaction by id, from the mempool or (with a tx index) the chain.
    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, RpcError>;

    /// Decode a transaction into ids, spent outpoints and output addresses.
    async fn decode_raw_transaction(&self, tx: &Transaction) -> Result<DecodedTx, RpcError>;

    /// Submit a signed transaction for relay. Returns its id.
    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError>;
}

// =============================================================================
// Response Types
// =============================================================================

/// `decoderawtransaction` result.
#[derive(Debug, Clone, Deserialize)]
struct RawDecodedTx {
    txid: String,
    #[serde(default)]
    vin: Vec<RawVin>,
    #[serde(default)]
    vout: Vec<RawVout>,
}

/// Input entry. Coinbase inputs carry `coinbase` instead of an outpoint.
#[derive(Debug, Clone, Deserialize)]
struct RawVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    coinbase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawVout {
    value: f64,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScriptPubKey,
}

/// Output script summary. btcd and older bitcoind list `addresses`;
/// bitcoind 22+ reports a single `address`.
#[derive(Debug, Clone, Deserialize)]
struct RawScriptPubKey {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addresses: Option<Vec<String>>,
}

impl RawDecodedTx {
    fn into_decoded(self) -> Result<DecodedTx, RpcError> {
        let txid = parse_txid(&self.txid, "decoderawtransaction txid")?;

        let mut inputs = Vec::with_capacity(self.vin.len());
        for vin in self.vin {
            if vin.coinbase.is_some() {
                continue;
            }
            match (vin.txid, vin.vout) {
                (Some(prev), Some(vout)) => {
                    let prev = parse_txid(&prev, "decoderawtransaction vin")?;
                    inputs.push(OutPoint::new(prev, vout));
                }
                _ => return Err(RpcError::decode("decoderawtransaction vin", "missing txid/vout")),
            }
        }

        let mut outputs = Vec::with_capacity(self.vout.len());
        for vout in self.vout {
            let value = coin_value_to_amount(vout.value)
                .map_err(|e| RpcError::decode("decoderawtransaction vout value", e))?;
            let mut addresses = vout.script_pub_key.addresses.unwrap_or_default();
            if let Some(address) = vout.script_pub_key.address {
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
            outputs.push(DecodedOutput {
                index: vout.n,
                value,
                addresses,
            });
        }

        Ok(DecodedTx {
            txid,
            inputs,
            outputs,
        })
    }
}

fn parse_txid(s: &str, context: &str) -> Result<Txid, RpcError> {
    Txid::from_str(s).map_err(|e| RpcError::decode(context, e))
}

fn decode_hex_consensus<T: bitcoin::consensus::Decodable>(
    val: &Value,
    context: &str,
) -> Result<T, RpcError> {
    let hex_str = val
        .as_str()
        .ok_or_else(|| RpcError::decode(context, "expected hex string"))?;
    let bytes = hex::decode(hex_str).map_err(|e| RpcError::decode(context, e))?;
    bitcoin::consensus::deserialize(&bytes).map_err(|e| RpcError::decode(context, e))
}

// =============================================================================
// JSON-RPC implementation
// =============================================================================

/// JSON-RPC client for a bitcoind/btcd node.
pub struct BtcNode {
    client: RpcClient,
}

impl BtcNode {
    /// Create a node client with default settings.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::new(url)?,
        })
    }

    /// Create a node client with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::with_config(config)?,
        })
    }
}

#[async_trait]
impl NodeRpc for BtcNode {
    async fn best_height(&self) -> Result<u64, RpcError> {
        let val = self.client.call("getblockcount", &[]).await?;
        val.as_u64().ok_or(RpcError::NoResult {
            context: "getblockcount".into(),
        })
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        let val = self.client.call("getblockhash", &[json!(height)]).await?;
        let s = val
            .as_str()
            .ok_or_else(|| RpcError::decode("getblockhash", "expected hex string"))?;
        BlockHash::from_str(s).map_err(|e| RpcError::decode(format!("getblockhash({})", height), e))
    }

    async fn block(&self, hash: &BlockHash) -> Result<Vec<Transaction>, RpcError> {
        let val = self
            .client
            .call("getblock", &[json!(hash.to_string()), json!(false)])
            .await?;
        let block: Block = decode_hex_consensus(&val, "getblock")?;
        Ok(block.txdata)
    }

    async fn raw_mempool(&self) -> Result<Vec<Txid>, RpcError> {
        let val = self.client.call("getrawmempool", &[]).await?;
        let arr = val
            .as_array()
            .ok_or_else(|| RpcError::decode("getrawmempool", "expected array"))?;
        arr.iter()
            .map(|v| {
                let s = v
                    .as_str()
                    .ok_or_else(|| RpcError::decode("getrawmempool", "expected hex string"))?;
                parse_txid(s, "getrawmempool")
            })
            .collect()
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, RpcError> {
        let val = self
            .client
            .call("getrawtransaction", &[json!(txid.to_string()), json!(0)])
            .await?;
        decode_hex_consensus(&val, "getrawtransaction")
    }

    async fn decode_raw_transaction(&self, tx: &Transaction) -> Result<DecodedTx, RpcError> {
        let tx_hex = hex::encode(bitcoin::consensus::serialize(tx));
        let val = self
            .client
            .call("decoderawtransaction", &[json!(tx_hex)])
            .await?;
        let raw: RawDecodedTx = serde_json::from_value(val)?;
        raw.into_decoded()
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError> {
        let tx_hex = hex::encode(bitcoin::consensus::serialize(tx));
        let val = self
            .client
            .call("sendrawtransaction", &[json!(tx_hex)])
            .await?;
        let s = val
            .as_str()
            .ok_or_else(|| RpcError::decode("sendrawtransaction", "expected txid"))?;
        parse_txid(s, "sendrawtransaction")
    }
}
