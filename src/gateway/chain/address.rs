//! Address rules per asset
//!
//! Ledger identifiers look like `<schema>:<address>@<wallet>`; the schema
//! prefix and wallet suffix are stripped before the address itself is checked.

use bitcoincore_rpc::bitcoin::address::NetworkUnchecked;
use bitcoincore_rpc::bitcoin::{Address, Network};

use super::ChainError;
use crate::config::ChainKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRule {
    /// Base58 / bech32 address valid for the given network
    Utxo { network: Network },
    /// 20-byte hex account address, normalized to lowercase
    Account,
}

impl AddressRule {
    pub fn for_chain(kind: ChainKind, network: &str) -> Result<Self, ChainError> {
        match kind {
            ChainKind::Account => Ok(AddressRule::Account),
            ChainKind::Utxo => {
                let network = match network {
                    "mainnet" | "main" | "bitcoin" => Network::Bitcoin,
                    "testnet" | "test" => Network::Testnet,
                    "signet" => Network::Signet,
                    "regtest" => Network::Regtest,
                    other => {
                        return Err(ChainError::Config(format!(
                            "unknown bitcoin network: {}",
                            other
                        )));
                    }
                };
                Ok(AddressRule::Utxo { network })
            }
        }
    }

    /// Validate and return the canonical form of `address`
    pub fn normalize(&self, address: &str) -> Result<String, ChainError> {
        match self {
            AddressRule::Utxo { network } => {
                let unchecked: Address<NetworkUnchecked> = address
                    .parse()
                    .map_err(|e| ChainError::InvalidAddress(format!("{}: {}", address, e)))?;
                if !unchecked.is_valid_for_network(*network) {
                    return Err(ChainError::InvalidAddress(format!(
                        "{} is not a {} address",
                        address, network
                    )));
                }
                Ok(unchecked.assume_checked().to_string())
            }
            AddressRule::Account => {
                let hex_part = address
                    .strip_prefix("0x")
                    .or_else(|| address.strip_prefix("0X"))
                    .ok_or_else(|| ChainError::InvalidAddress(format!("{}: missing 0x", address)))?;
                if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ChainError::InvalidAddress(format!(
                        "{}: expected 20 hex bytes",
                        address
                    )));
                }
                Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
            }
        }
    }
}

/// Strip `<schema>:` and `@<wallet>` from a ledger identifier
pub fn parse_ledger_identifier<'a>(identifier: &'a str, schema: &str) -> Result<&'a str, ChainError> {
    let rest = match identifier.split_once(':') {
        Some((prefix, rest)) if prefix == schema => rest,
        Some((prefix, _)) => {
            return Err(ChainError::InvalidAddress(format!(
                "{}: expected schema {}, got {}",
                identifier, schema, prefix
            )));
        }
        None => identifier,
    };
    let address = rest.split_once('@').map_or(rest, |(address, _)| address);
    if address.is_empty() {
        return Err(ChainError::InvalidAddress(format!("{}: empty address", identifier)));
    }
    Ok(address)
}

/// Whether `reference` has the shape of a transaction hash
pub fn looks_like_tx_hash(reference: &str) -> bool {
    let hex_part = reference.strip_prefix("0x").unwrap_or(reference);
    hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}
