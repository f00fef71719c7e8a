//! Chain Gateway
//!
//! Pays out and verifies on-chain transfers for one asset (BTC via bitcoind,
//! ETH via JSON-RPC). Chains cannot pull funds, so inbound flows are refused.
//!
//! Idempotency: the broadcast hash is recorded under the idempotency key. A
//! second submit under a known key reports the status of the first broadcast
//! instead of sending again.

pub mod address;
pub mod btc;
pub mod evm;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{Destination, Flow, Gateway, GatewayFailure, GatewayResult, PaymentOrder};
use crate::config::ChainAssetConfig;
use crate::money::{self, MoneyError};
use crate::settlement::classifier::{Classification, TRANSPORT_FAULT};
use crate::settlement::{IdempotencyKey, SettlementError};
use address::{AddressRule, looks_like_tx_hash, parse_ledger_identifier};

pub use btc::BitcoindRpc;
pub use evm::EvmRpc;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Request never reached the node
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// Request may have reached the node; outcome unknown
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// What the node knows about a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxObservation {
    NotFound,
    Included { confirmations: u64, success: bool },
}

/// A confirmed transfer into a watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTransfer {
    pub tx_hash: String,
    /// Paying address when the node can tell
    pub sender: Option<String>,
    /// Amount in base units (sats, wei)
    pub amount: u128,
    pub height: u64,
}

/// Node access for one chain
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_height(&self) -> Result<u64, ChainError>;

    /// Spendable balance in base units
    async fn balance(&self, address: &str) -> Result<u128, ChainError>;

    /// Send `amount` base units, returns the transaction hash
    async fn broadcast(&self, from: &str, to: &str, amount: u128) -> Result<String, ChainError>;

    async fn observe(&self, tx_hash: &str) -> Result<TxObservation, ChainError>;

    /// Transfers into `address` in blocks `(from_height, to_height]`
    async fn incoming(
        &self,
        address: &str,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<IncomingTransfer>, ChainError>;
}

/// Static description of a chain asset
#[derive(Debug, Clone)]
pub struct AssetProfile {
    pub symbol: String,
    /// Ledger address schema (`bitcoin`, `ethereum`)
    pub schema: String,
    /// Ledger wallet holding the bridge's book of this asset
    pub wallet: String,
    pub decimals: u32,
    pub required_confirmations: u64,
    pub custodial_address: String,
    pub rule: AddressRule,
}

impl AssetProfile {
    pub fn from_config(config: &ChainAssetConfig) -> Result<Self, ChainError> {
        let rule = AddressRule::for_chain(config.kind, &config.network)?;
        let custodial_address = rule.normalize(&config.custodial_address)?;
        Ok(Self {
            symbol: config.symbol.to_ascii_lowercase(),
            schema: config.schema.clone(),
            wallet: config.wallet.clone(),
            decimals: config.decimals,
            required_confirmations: config.required_confirmations,
            custodial_address,
            rule,
        })
    }

    /// Ledger identity of an on-chain address (`<schema>:<address>`)
    pub fn ledger_identifier(&self, address: &str) -> String {
        format!("{}:{}", self.schema, address)
    }
}

pub struct ChainGateway {
    profile: AssetProfile,
    rpc: Arc<dyn ChainRpc>,
    /// idempotency key -> broadcast hash
    submissions: DashMap<String, String>,
}

impl ChainGateway {
    pub fn new(profile: AssetProfile, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            profile,
            rpc,
            submissions: DashMap::new(),
        }
    }

    pub fn profile(&self) -> &AssetProfile {
        &self.profile
    }

    pub async fn latest_height(&self) -> Result<u64, ChainError> {
        self.rpc.latest_height().await
    }

    /// Transfers into the custodial address in `(from_height, to_height]`
    pub async fn incoming(&self, from_height: u64, to_height: u64) -> Result<Vec<IncomingTransfer>, ChainError> {
        self.rpc
            .incoming(&self.profile.custodial_address, from_height, to_height)
            .await
    }

    async fn status_of(&self, tx_hash: &str) -> GatewayResult {
        match self.rpc.observe(tx_hash).await {
            Ok(TxObservation::NotFound) => GatewayResult::StillPending,
            Ok(TxObservation::Included { success: false, .. }) => GatewayResult::Failed(
                GatewayFailure::unsettled("reverted", format!("{} failed on chain", tx_hash)),
            ),
            Ok(TxObservation::Included { confirmations, .. })
                if confirmations >= self.profile.required_confirmations =>
            {
                GatewayResult::Settled(tx_hash.to_string())
            }
            Ok(TxObservation::Included { .. }) => GatewayResult::StillPending,
            Err(e) => {
                GatewayResult::Failed(GatewayFailure::retryable(TRANSPORT_FAULT, e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Gateway for ChainGateway {
    fn rail(&self) -> &str {
        &self.profile.symbol
    }

    fn can_pull(&self) -> bool {
        false
    }

    async fn validate_destination(&self, identifier: &str) -> Result<Destination, SettlementError> {
        parse_ledger_identifier(identifier, &self.profile.schema)
            .and_then(|address| self.profile.rule.normalize(address))
            .map(Destination::Address)
            .map_err(|e| SettlementError::InvalidDestination(e.to_string()))
    }

    async fn check_available_balance(&self) -> Result<Decimal, SettlementError> {
        let base = self
            .rpc
            .balance(&self.profile.custodial_address)
            .await
            .map_err(|e| SettlementError::GatewayUnavailable(e.to_string()))?;
        Ok(money::from_base_units(base, self.profile.decimals)?)
    }

    async fn submit_payment(&self, order: &PaymentOrder, key: &IdempotencyKey) -> GatewayResult {
        let known = self.submissions.get(key.as_str()).map(|entry| entry.value().clone());
        if let Some(tx_hash) = known {
            info!(key = %key, tx = %tx_hash, "Already broadcast, reporting status");
            return self.status_of(&tx_hash).await;
        }

        if order.flow == Flow::Inbound {
            return GatewayResult::Failed(GatewayFailure::fatal(
                "unsupported-flow",
                format!("{} cannot collect funds", self.profile.symbol),
            ));
        }
        let Destination::Address(to) = &order.destination else {
            return GatewayResult::Failed(GatewayFailure::fatal(
                "invalid-destination",
                "chain payment needs an address",
            ));
        };
        let amount = match money::to_base_units(order.amount, self.profile.decimals) {
            Ok(amount) => amount,
            Err(e) => return GatewayResult::Failed(GatewayFailure::fatal("invalid-amount", e.to_string())),
        };

        match self
            .rpc
            .broadcast(&self.profile.custodial_address, to, amount)
            .await
        {
            Ok(tx_hash) => {
                info!(
                    key = %key,
                    tx = %tx_hash,
                    to = %to,
                    amount = %order.amount,
                    symbol = %self.profile.symbol,
                    "Broadcast payment"
                );
                self.submissions.insert(key.as_str().to_string(), tx_hash.clone());
                if self.profile.required_confirmations == 0 {
                    GatewayResult::Settled(tx_hash)
                } else {
                    GatewayResult::StillPending
                }
            }
            Err(ChainError::Unreachable(message)) => {
                GatewayResult::Failed(GatewayFailure::retryable(TRANSPORT_FAULT, message))
            }
            Err(ChainError::Rpc { code, message }) => {
                warn!(key = %key, code, message = %message, "Node rejected broadcast");
                GatewayResult::Failed(GatewayFailure::fatal(code.to_string(), message))
            }
            Err(e) => {
                // The node may have accepted the send; resending could pay twice
                warn!(key = %key, error = %e, "Broadcast outcome unknown");
                GatewayResult::Failed(GatewayFailure::new(
                    "broadcast-indeterminate",
                    e.to_string(),
                    Classification::Fatal,
                ))
            }
        }
    }

    async fn query_status(&self, reference: &str) -> GatewayResult {
        let known = self.submissions.get(reference).map(|entry| entry.value().clone());
        match known {
            Some(tx_hash) => self.status_of(&tx_hash).await,
            None if looks_like_tx_hash(reference) => self.status_of(reference).await,
            None => {
                let mut failure = GatewayFailure::retryable(
                    "not-found",
                    format!("no transaction recorded for {}", reference),
                );
                failure.not_found = true;
                GatewayResult::Failed(failure)
            }
        }
    }
}
