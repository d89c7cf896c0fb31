//! Address parsing and the address kinds the wallet derives.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, Script};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must be a non-empty string")]
    Empty,

    #[error("invalid address {address}: {reason}")]
    Invalid { address: String, reason: String },

    #[error("address {address} does not belong to network {network}")]
    WrongNetwork { address: String, network: Network },

    #[error("unknown network: {0} (use bitcoin, testnet, signet or regtest)")]
    UnknownNetwork(String),

    #[error("unknown address kind: {0} (use p2pkh or p2wpkh)")]
    UnknownKind(String),
}

/// Script form of the receiving addresses handed out to sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// Legacy pay-to-pubkey-hash.
    #[default]
    P2pkh,
    /// Native segwit v0 pay-to-witness-pubkey-hash.
    P2wpkh,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P2pkh => write!(f, "p2pkh"),
            Self::P2wpkh => write!(f, "p2wpkh"),
        }
    }
}

impl FromStr for AddressKind {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, AddressError> {
        match s.to_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(Self::P2pkh),
            "p2wpkh" | "segwit" => Ok(Self::P2wpkh),
            _ => Err(AddressError::UnknownKind(s.to_string())),
        }
    }
}

/// Parse a network name, accepting the common aliases.
pub fn parse_network(name: &str) -> Result<Network, AddressError> {
    match name.to_lowercase().as_str() {
        "bitcoin" | "mainnet" | "main" => Ok(Network::Bitcoin),
        "testnet" | "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" | "simnet" => Ok(Network::Regtest),
        _ => Err(AddressError::UnknownNetwork(name.to_string())),
    }
}

/// Parse an address string and check that it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address, AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    let unchecked: Address<NetworkUnchecked> =
        address.parse().map_err(|e: bitcoin::address::ParseError| AddressError::Invalid {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    unchecked
        .require_network(network)
        .map_err(|_| AddressError::WrongNetwork {
            address: address.to_string(),
            network,
        })
}

/// Addresses a locking script pays to. Empty for non-standard scripts.
pub fn script_addresses(script: &Script, network: Network) -> Vec<String> {
    match Address::from_script(script, network) {
        Ok(address) => vec![address.to_string()],
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGTEST_P2PKH: &str = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn";
    const MAINNET_P2PKH: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";

    #[test]
    fn test_parse_address_on_matching_network() {
        let addr = parse_address(REGTEST_P2PKH, Network::Regtest).unwrap();
        assert_eq!(addr.to_string(), REGTEST_P2PKH);
    }

    #[test]
    fn test_parse_address_wrong_network() {
        let err = parse_address(MAINNET_P2PKH, Network::Regtest).unwrap_err();
        assert!(matches!(err, AddressError::WrongNetwork { .. }));
    }

    #[test]
    fn test_parse_address_empty_and_garbage() {
        assert!(matches!(parse_address("  ", Network::Bitcoin), Err(AddressError::Empty)));
        assert!(matches!(
            parse_address("not-an-address", Network::Bitcoin),
            Err(AddressError::Invalid { .. })
        ));
    }

    #[test]
    fn test_script_addresses_roundtrip() {
        let addr = parse_address(MAINNET_P2PKH, Network::Bitcoin).unwrap();
        let found = script_addresses(&addr.script_pubkey(), Network::Bitcoin);
        assert_eq!(found, vec![MAINNET_P2PKH.to_string()]);
    }

    #[test]
    fn test_script_addresses_nonstandard() {
        let script = bitcoin::ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x00]);
        assert!(script_addresses(&script, Network::Bitcoin).is_empty());
    }

    #[test]
    fn test_network_aliases() {
        assert_eq!(parse_network("mainnet").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("SimNet").unwrap(), Network::Regtest);
        assert!(parse_network("stagenet").is_err());
    }

    #[test]
    fn test_address_kind_parse_display() {
        assert_eq!("P2WPKH".parse::<AddressKind>().unwrap(), AddressKind::P2wpkh);
        assert_eq!("legacy".parse::<AddressKind>().unwrap(), AddressKind::P2pkh);
        assert_eq!(AddressKind::P2wpkh.to_string(), "p2wpkh");
        assert!("taproot".parse::<AddressKind>().is_err());
        assert_eq!(AddressKind::default(), AddressKind::P2pkh);
    }
}
