//! Service configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty object is a
//! valid configuration for a local regtest node.

use crate::error::WalletError;
use bitcoin::{Amount, Network};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tilepay_rpc::{Credentials, RpcConfig};
use tilepay_types::address::parse_network;
use tilepay_types::constants::*;
use tilepay_types::AddressKind;

const SECS_PER_DAY: u64 = 86_400;

/// Longest session lifetime accepted from a configuration file.
const MAX_SESSION_TTL_DAYS: u64 = 36_500;

/// Node connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM certificate to trust for HTTPS (btcd's `rpc.cert`).
    pub cert_path: Option<String>,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: format!("http://127.0.0.1:{}", tilepay_rpc::ports::BITCOIND_REGTEST),
            username: None,
            password: None,
            cert_path: None,
            timeout_secs: 30,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub node: NodeConfig,
    /// SQLite file holding the UTXO table and cursor.
    pub db_path: String,
    /// SQLite file backing the shared cache. `None` keeps the cache in process.
    pub cache_path: Option<String>,
    pub network: String,
    pub address_kind: String,
    pub fee_sats: u64,
    pub sync_interval_secs: u64,
    pub mempool_interval_secs: u64,
    pub provisional_ttl_secs: u64,
    pub mempool_max_fetch_failures: u32,
    pub session_ttl_days: u64,
    pub reservation_ttl_secs: u64,
    /// First height to ingest on a fresh ledger.
    pub start_height: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            db_path: "tilepay.db".to_string(),
            cache_path: None,
            network: "regtest".to_string(),
            address_kind: AddressKind::default().to_string(),
            fee_sats: DEFAULT_FEE_SATS,
            sync_interval_secs: SYNC_INTERVAL.as_secs(),
            mempool_interval_secs: MEMPOOL_INTERVAL.as_secs(),
            provisional_ttl_secs: PROVISIONAL_SPEND_TTL.as_secs(),
            mempool_max_fetch_failures: MEMPOOL_MAX_FETCH_FAILURES,
            session_ttl_days: SESSION_TTL.as_secs() / SECS_PER_DAY,
            reservation_ttl_secs: RESERVATION_TTL.as_secs(),
            start_height: 0,
        }
    }
}

impl ServiceConfig {
    /// Read a configuration file.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, WalletError> {
        serde_json::from_str(text).map_err(|e| WalletError::Config(e.to_string()))
    }

    /// Check settings that would make the ledger unsafe to run.
    pub fn validate(&self) -> Result<(), WalletError> {
        self.network()?;
        self.address_kind()?;

        if self.node.url.trim().is_empty() {
            return Err(WalletError::Config("node.url is empty".into()));
        }
        if self.fee_sats == 0 {
            return Err(WalletError::Config("fee_sats must be positive".into()));
        }
        if self.mempool_interval_secs == 0 || self.sync_interval_secs == 0 {
            return Err(WalletError::Config("poll intervals must be positive".into()));
        }
        if self.provisional_ttl_secs <= self.mempool_interval_secs {
            return Err(WalletError::Config(format!(
                "provisional_ttl_secs ({}) must exceed mempool_interval_secs ({})",
                self.provisional_ttl_secs, self.mempool_interval_secs
            )));
        }
        if self.session_ttl_days == 0 {
            return Err(WalletError::Config("session_ttl_days must be positive".into()));
        }
        if self.session_ttl_days > MAX_SESSION_TTL_DAYS
            || self.session_ttl_days.checked_mul(SECS_PER_DAY).is_none()
        {
            return Err(WalletError::Config(format!(
                "session_ttl_days ({}) exceeds {}",
                self.session_ttl_days, MAX_SESSION_TTL_DAYS
            )));
        }
        if self.reservation_ttl_secs == 0 {
            return Err(WalletError::Config("reservation_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn network(&self) -> Result<Network, WalletError> {
        Ok(parse_network(&self.network)?)
    }

    pub fn address_kind(&self) -> Result<AddressKind, WalletError> {
        Ok(self.address_kind.parse::<AddressKind>()?)
    }

    pub fn fee(&self) -> Amount {
        Amount::from_sat(self.fee_sats)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn mempool_interval(&self) -> Duration {
        Duration::from_secs(self.mempool_interval_secs)
    }

    pub fn provisional_ttl(&self) -> Duration {
        Duration::from_secs(self.provisional_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    /// Build the RPC client settings, loading the trusted certificate if set.
    pub fn rpc_config(&self) -> Result<RpcConfig, WalletError> {
        let root_cert_pem = match &self.node.cert_path {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                WalletError::Config(format!("reading certificate {}: {}", path, e))
            })?),
            None => None,
        };

        Ok(RpcConfig {
            url: self.node.url.clone(),
            credentials: Credentials::pair(self.node.username.clone(), self.node.password.clone()),
            root_cert_pem,
            timeout: Duration::from_secs(self.node.timeout_secs),
            retries: self.node.retries,
            ..Default::default()
        })
    }
}
