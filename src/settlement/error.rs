//! Settlement Error Types
//!
//! Every failure that can end a job maps to a [`FailureReason`] code the
//! orchestrator understands, plus a human-readable detail.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::classifier::Classification;
use crate::money::MoneyError;

/// Reason codes reported in `Failed` adapter results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    IntentUnrelated,
    AccountNotFound,
    InsufficientBalance,
    TransactionRejected,
    FraudDetected,
    RetryLimitExceeded,
    SettlementIrreversible,
    UnexpectedError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::IntentUnrelated => "bridge.intent-unrelated",
            FailureReason::AccountNotFound => "bridge.account-not-found",
            FailureReason::InsufficientBalance => "bridge.account-insufficient-balance",
            FailureReason::TransactionRejected => "bridge.transaction-rejected",
            FailureReason::FraudDetected => "bridge.fraud-detected",
            FailureReason::RetryLimitExceeded => "bridge.retry-limit-exceeded",
            FailureReason::SettlementIrreversible => "bridge.settlement-irreversible",
            FailureReason::UnexpectedError => "bridge.unexpected-error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail stored on a FAILED job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub reason: FailureReason,
    pub detail: String,
}

impl JobError {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Settlement error taxonomy
#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Validation Errors ===
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transaction not recognized: {0}")]
    UnrecognizedTransaction(String),

    #[error("No settlement route for {0}")]
    Unrouted(String),

    // === Funds ===
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    // === External System ===
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("External operation still pending: {0}")]
    ExternalPending(String),

    #[error("External error {code}: {message}")]
    ExternalUnknown { code: String, message: String },

    #[error("Settlement cannot be reversed: {0}")]
    Irreversible(String),

    #[error("Gave up after {attempts} attempts")]
    RetryLimitExceeded { attempts: u32 },
}

impl SettlementError {
    /// Error code for logs
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidDestination(_) => "INVALID_DESTINATION",
            SettlementError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettlementError::UnrecognizedTransaction(_) => "UNRECOGNIZED_TRANSACTION",
            SettlementError::Unrouted(_) => "UNROUTED",
            SettlementError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettlementError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            SettlementError::ExternalPending(_) => "EXTERNAL_PENDING",
            SettlementError::ExternalUnknown { .. } => "EXTERNAL_UNKNOWN",
            SettlementError::Irreversible(_) => "IRREVERSIBLE",
            SettlementError::RetryLimitExceeded { .. } => "RETRY_LIMIT_EXCEEDED",
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            SettlementError::GatewayUnavailable(_) => Classification::Retryable,
            SettlementError::ExternalPending(_) => Classification::Pending,
            _ => Classification::Fatal,
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            SettlementError::InvalidDestination(_) => FailureReason::AccountNotFound,
            SettlementError::InvalidAmount(_) => FailureReason::TransactionRejected,
            SettlementError::UnrecognizedTransaction(_) => FailureReason::FraudDetected,
            SettlementError::Unrouted(_) => FailureReason::IntentUnrelated,
            SettlementError::InsufficientBalance { .. } => FailureReason::InsufficientBalance,
            SettlementError::Irreversible(_) => FailureReason::SettlementIrreversible,
            SettlementError::RetryLimitExceeded { .. } => FailureReason::RetryLimitExceeded,
            SettlementError::GatewayUnavailable(_)
            | SettlementError::ExternalPending(_)
            | SettlementError::ExternalUnknown { .. } => FailureReason::UnexpectedError,
        }
    }
}

impl From<&SettlementError> for JobError {
    fn from(e: &SettlementError) -> Self {
        JobError::new(e.reason(), e.to_string())
    }
}

impl From<MoneyError> for SettlementError {
    fn from(e: MoneyError) -> Self {
        SettlementError::InvalidAmount(e.to_string())
    }
}
