//! Service facade.
//!
//! [`WalletService`] owns the shared dependencies (node, ledger, cache,
//! session store). Request handlers open a [`SessionWallet`] per request;
//! the background [`Monitor`] keeps the ledger current.

use crate::builder::TransactionBuilder;
use crate::config::ServiceConfig;
use crate::error::WalletError;
use crate::manager::{WalletManager, WalletParams};
use crate::mempool::MempoolWatcher;
use crate::session::SessionKeyStore;
use crate::sync::ChainSynchronizer;
use bitcoin::{Address, Amount, Txid};
use std::sync::Arc;
use std::time::Duration;
use tilepay_rpc::{BtcNode, NodeRpc};
use tilepay_store::{Cache, Ledger, LedgerDb, MemoryCache, SqliteCache};
use tilepay_types::address::parse_address;
use tokio::sync::watch;

pub struct WalletService {
    node: Arc<dyn NodeRpc>,
    ledger: Arc<Ledger>,
    sessions: Arc<SessionKeyStore>,
    params: WalletParams,
    fee: Amount,
    reservation_ttl: Duration,
}

impl WalletService {
    pub fn new(
        node: Arc<dyn NodeRpc>,
        ledger: Arc<Ledger>,
        sessions: Arc<SessionKeyStore>,
        params: WalletParams,
        fee: Amount,
    ) -> Self {
        Self {
            node,
            ledger,
            sessions,
            params,
            fee,
            reservation_ttl: tilepay_types::constants::RESERVATION_TTL,
        }
    }

    /// Open the configured stores and connect to the configured node.
    pub fn open(config: &ServiceConfig) -> Result<Self, WalletError> {
        config.validate()?;
        let node = BtcNode::with_config(config.rpc_config()?)?;
        Self::with_node(config, Arc::new(node))
    }

    /// Open the configured stores against an existing node connection.
    pub fn with_node(config: &ServiceConfig, node: Arc<dyn NodeRpc>) -> Result<Self, WalletError> {
        let cache: Arc<dyn Cache> = match &config.cache_path {
            Some(path) => Arc::new(SqliteCache::open(path)?),
            None => Arc::new(MemoryCache::new()),
        };
        let ledger = Arc::new(Ledger::new(LedgerDb::open(&config.db_path)?, cache.clone()));
        let sessions = Arc::new(SessionKeyStore::new(cache, config.session_ttl()));
        let params = WalletParams {
            network: config.network()?,
            kind: config.address_kind()?,
        };

        let mut service = Self::new(node, ledger, sessions, params, config.fee());
        service.reservation_ttl = config.reservation_ttl();
        Ok(service)
    }

    pub fn node(&self) -> &Arc<dyn NodeRpc> {
        &self.node
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn params(&self) -> WalletParams {
        self.params
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    /// Request-scoped wallet for one session.
    pub fn session(&self, session_id: &str) -> SessionWallet<'_> {
        SessionWallet {
            service: self,
            session_id: session_id.to_string(),
            manager: WalletManager::new(self.sessions.clone(), self.ledger.clone(), self.params),
        }
    }

    /// Spendable balance of any address on the service's network.
    pub fn get_balance_for_address(&self, address: &str) -> Result<Amount, WalletError> {
        let address = parse_address(address, self.params.network)?;
        Ok(self.ledger.balance(&address.to_string())?)
    }

    /// Background tasks configured from `config`.
    pub fn monitor(&self, config: &ServiceConfig) -> Monitor {
        let sync = ChainSynchronizer::new(self.node.clone(), self.ledger.clone(), config.sync_interval())
            .with_start_height(config.start_height);
        let mempool = MempoolWatcher::new(
            self.node.clone(),
            self.ledger.clone(),
            config.mempool_interval(),
            config.provisional_ttl(),
            config.mempool_max_fetch_failures,
        );
        Monitor::new(sync, mempool)
    }
}

/// The operations a web request performs, bound to one session.
///
/// Signing keys live only as long as this value.
pub struct SessionWallet<'a> {
    service: &'a WalletService,
    session_id: String,
    manager: WalletManager,
}

impl SessionWallet<'_> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The session's first `n` addresses.
    pub fn make_addresses(&mut self, n: u32) -> Result<Vec<Address>, WalletError> {
        self.manager.derive_addresses(&self.session_id, n)
    }

    /// Balances of the session's first `n` addresses, in index order.
    pub fn get_address_balances(&mut self, n: u32) -> Result<Vec<Amount>, WalletError> {
        Ok(self
            .manager
            .balances(&self.session_id, n)?
            .into_iter()
            .map(|(_, amount)| amount)
            .collect())
    }

    pub fn get_balance_for_address(&self, address: &str) -> Result<Amount, WalletError> {
        self.service.get_balance_for_address(address)
    }

    /// Spend from an address this session derived.
    ///
    /// Call [`make_addresses`](Self::make_addresses) first; an address the
    /// wallet has not derived fails with [`WalletError::KeyNotFound`].
    pub async fn perform_purchase(
        &self,
        source: &str,
        amount: Amount,
        destination: &str,
    ) -> Result<Txid, WalletError> {
        TransactionBuilder::new(
            self.service.node.as_ref(),
            &self.service.ledger,
            &self.manager,
            self.service.fee,
        )
        .with_reservation_ttl(self.service.reservation_ttl)
        .perform_purchase(source, amount, destination)
        .await
    }
}

/// Chain synchronizer and mempool watcher run side by side.
pub struct Monitor {
    sync: ChainSynchronizer,
    mempool: MempoolWatcher,
}

impl Monitor {
    pub fn new(sync: ChainSynchronizer, mempool: MempoolWatcher) -> Self {
        Self { sync, mempool }
    }

    /// Run both loops until shutdown, or until either hits a fatal error.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WalletError> {
        let Monitor { sync, mut mempool } = self;
        tokio::try_join!(sync.run(shutdown.clone()), mempool.run(shutdown))?;
        Ok(())
    }
}
