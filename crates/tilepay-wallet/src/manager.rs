//! Wallet manager.
//!
//! Derives session addresses, registers them with the ledger's known-address
//! set, reports balances and hands out signing keys. Keys are cached only in
//! the instance; create one manager per request or session and drop it when
//! done.

use crate::error::WalletError;
use crate::keys::{derive_keys, DerivedKey};
use crate::session::SessionKeyStore;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, Amount, Network};
use std::collections::HashMap;
use std::sync::Arc;
use tilepay_store::Ledger;
use tilepay_types::AddressKind;

/// Network and script form of derived addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletParams {
    pub network: Network,
    pub kind: AddressKind,
}

pub struct WalletManager {
    sessions: Arc<SessionKeyStore>,
    ledger: Arc<Ledger>,
    params: WalletParams,
    secp: Secp256k1<All>,
    /// Address string to key, for every address this instance derived.
    held: HashMap<String, DerivedKey>,
}

impl WalletManager {
    pub fn new(sessions: Arc<SessionKeyStore>, ledger: Arc<Ledger>, params: WalletParams) -> Self {
        Self {
            sessions,
            ledger,
            params,
            secp: Secp256k1::new(),
            held: HashMap::new(),
        }
    }

    pub fn params(&self) -> WalletParams {
        self.params
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Addresses `0..count` of a session, registered as known and with their
    /// keys retained for signing.
    pub fn derive_addresses(
        &mut self,
        session_id: &str,
        count: u32,
    ) -> Result<Vec<Address>, WalletError> {
        let seed = self.sessions.get(session_id)?;
        let keys = derive_keys(&self.secp, &seed, count, self.params.network, self.params.kind)?;

        let mut addresses = Vec::with_capacity(keys.len());
        for key in keys {
            let address = key.address.to_string();
            if self.ledger.register_address(&address)? {
                log::debug!("registered address {} (index {})", address, key.index);
            }
            addresses.push(key.address.clone());
            self.held.insert(address, key);
        }
        Ok(addresses)
    }

    /// Spendable balance of any address.
    pub fn balance(&self, address: &str) -> Result<Amount, WalletError> {
        Ok(self.ledger.balance(address)?)
    }

    /// Balances of addresses `0..count` of a session, in index order.
    pub fn balances(
        &mut self,
        session_id: &str,
        count: u32,
    ) -> Result<Vec<(Address, Amount)>, WalletError> {
        let addresses = self.derive_addresses(session_id, count)?;
        addresses
            .into_iter()
            .map(|address| {
                let amount = self.balance(&address.to_string())?;
                Ok((address, amount))
            })
            .collect()
    }

    /// Signing key of an address this instance derived.
    pub fn key_for(&self, address: &str) -> Result<&DerivedKey, WalletError> {
        self.held
            .get(address)
            .ok_or_else(|| WalletError::KeyNotFound(address.to_string()))
    }
}
