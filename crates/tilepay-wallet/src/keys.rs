//! Deterministic address derivation.
//!
//! A session seed becomes a BIP32 master key; receiving address `i` is the
//! non-hardened child `m/i` encoded as P2PKH or P2WPKH.

use crate::error::WalletError;
use crate::session::SessionSeed;
use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::{Address, Network, PrivateKey, PublicKey};
use std::fmt;
use tilepay_types::AddressKind;

/// A derived receiving address with its signing key.
#[derive(Clone)]
pub struct DerivedKey {
    pub index: u32,
    pub address: Address,
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
    pub kind: AddressKind,
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Derive keys `0..count` of a session.
pub fn derive_keys<C: Signing>(
    secp: &Secp256k1<C>,
    seed: &SessionSeed,
    count: u32,
    network: Network,
    kind: AddressKind,
) -> Result<Vec<DerivedKey>, WalletError> {
    let master = Xpriv::new_master(network, seed.as_bytes())
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

    (0..count)
        .map(|index| derive_child(secp, &master, index, network, kind))
        .collect()
}

fn derive_child<C: Signing>(
    secp: &Secp256k1<C>,
    master: &Xpriv,
    index: u32,
    network: Network,
    kind: AddressKind,
) -> Result<DerivedKey, WalletError> {
    let child_number = ChildNumber::from_normal_idx(index)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    let child = master
        .derive_priv(secp, &[child_number])
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

    let private_key = child.to_priv();
    let public_key = private_key.public_key(secp);
    let address = match kind {
        AddressKind::P2pkh => Address::p2pkh(public_key.pubkey_hash(), network),
        AddressKind::P2wpkh => Address::p2wpkh(&CompressedPublicKey(public_key.inner), network),
    };

    Ok(DerivedKey {
        index,
        address,
        public_key,
        private_key,
        kind,
    })
}
