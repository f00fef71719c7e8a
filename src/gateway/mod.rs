//! Gateways
//!
//! One contract over every external settlement rail. A gateway never raises
//! to its caller: every outcome comes back as a [`GatewayResult`] whose
//! failures are already classified.
//!
//! - [`chain::ChainGateway`] - BTC (bitcoind) and ETH (JSON-RPC) assets
//! - [`bank::BankGateway`] - legacy bank SOAP back-office

pub mod bank;
pub mod chain;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::settlement::classifier::{Classification, ErrorClassifier};
use crate::settlement::{IdempotencyKey, SettlementError};

pub use bank::{BankGateway, BusinessProfile};
pub use chain::{AssetProfile, ChainGateway};

/// Direction of a payment relative to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Flow {
    /// Bridge pays the counterparty
    Outbound,
    /// Bridge collects from the counterparty
    Inbound,
}

/// A validated, normalized counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(String),
    BankAccount(BusinessProfile),
}

#[derive(Debug, Clone)]
pub struct PaymentOrder {
    pub flow: Flow,
    pub destination: Destination,
    pub amount: Decimal,
    pub symbol: String,
    /// Free-text description carried to the rail where supported
    pub memo: String,
}

/// A classified gateway failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFailure {
    pub code: String,
    pub message: String,
    pub classification: Classification,
    /// Remote reported the referenced operation does not exist
    pub not_found: bool,
    /// Remote reported the referenced operation exists but never settled
    pub unsettled: bool,
}

impl GatewayFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>, classification: Classification) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            classification,
            not_found: false,
            unsettled: false,
        }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Classification::Fatal)
    }

    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Classification::Retryable)
    }

    /// The referenced operation reached a final state without moving funds
    pub fn unsettled(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unsettled: true,
            ..Self::fatal(code, message)
        }
    }

    /// Classify a raw (code, message) pair
    pub fn classified(classifier: &ErrorClassifier, code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            classification: classifier.classify(code, message),
            not_found: classifier.is_not_found(code, message),
            unsettled: false,
        }
    }
}

impl fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.code, self.message, self.classification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResult {
    Settled(String),
    StillPending,
    Failed(GatewayFailure),
}

/// External settlement rail
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Rail identifier jobs are bound to
    fn rail(&self) -> &str;

    /// Whether the rail can collect funds from a counterparty (inbound flows)
    fn can_pull(&self) -> bool;

    async fn validate_destination(&self, identifier: &str) -> Result<Destination, SettlementError>;

    /// Funds the bridge can pay out right now, in display units
    async fn check_available_balance(&self) -> Result<Decimal, SettlementError>;

    /// Submit a payment under `key`. Resubmitting the same key must not move
    /// funds twice.
    async fn submit_payment(&self, order: &PaymentOrder, key: &IdempotencyKey) -> GatewayResult;

    /// Status of a previously submitted payment (by key) or external reference
    async fn query_status(&self, reference: &str) -> GatewayResult;
}
