//! Settlement Types
//!
//! The adapter contract (context in, result out) and the job record the
//! store keeps per (phase, job handle).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{FailureReason, JobError, SettlementError};
use super::state::JobStatus;
use crate::gateway::Flow;

// ============================================================
// PHASES & SCHEMAS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Commit,
    Abort,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
            Phase::Abort => "abort",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(Phase::Prepare),
            "commit" => Ok(Phase::Commit),
            "abort" => Ok(Phase::Abort),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Direction of a ledger intent relative to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Ledger funds leave to an external rail
    Credit,
    /// External funds enter the ledger
    Debit,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Credit => "credit",
            Schema::Debit => "debit",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" | "credits" => Ok(Schema::Credit),
            "debit" | "debits" => Ok(Schema::Debit),
            other => Err(format!("unknown schema: {}", other)),
        }
    }
}

// ============================================================
// ADAPTER CONTRACT
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub source: String,
    pub target: String,
}

/// Input to every phase call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    /// Stable across all phases of one intent
    pub job_handle: String,
    pub phase_command_handle: String,
    pub counterparty: Counterparty,
    pub amount: Decimal,
    pub symbol: String,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl TransactionContext {
    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn custom_flag(&self, key: &str) -> bool {
        self.custom
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Output of every phase call; exactly one variant per call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AdapterResult {
    Prepared {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Committed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Aborted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Failed {
        #[serde(rename = "reasonCode")]
        reason_code: String,
        detail: String,
    },
    Suspended {
        #[serde(
            rename = "resumeAfterSeconds",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        resume_after_seconds: Option<u64>,
    },
}

impl AdapterResult {
    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        AdapterResult::Failed {
            reason_code: reason.as_str().to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, AdapterResult::Suspended { .. })
    }
}

impl From<&JobError> for AdapterResult {
    fn from(e: &JobError) -> Self {
        AdapterResult::failed(e.reason, e.detail.clone())
    }
}

impl From<&SettlementError> for AdapterResult {
    fn from(e: &SettlementError) -> Self {
        AdapterResult::failed(e.reason(), e.to_string())
    }
}

// ============================================================
// JOBS
// ============================================================

/// Store key: one live job per (phase, job handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub phase: Phase,
    pub handle: String,
}

impl JobKey {
    pub fn new(phase: Phase, handle: &str) -> Self {
        Self {
            phase,
            handle: handle.to_string(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.handle)
    }
}

/// Command identifier sent to the external system
///
/// Derived from the job handle, so retries and restarts of the same logical
/// operation present the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const ABORT_PREFIX: &'static str = "abort-";
    pub const COMMIT_PREFIX: &'static str = "commit-";

    pub fn for_phase(phase: Phase, handle: &str) -> Self {
        match phase {
            Phase::Prepare => IdempotencyKey(handle.to_string()),
            Phase::Commit => IdempotencyKey(format!("{}{}", Self::COMMIT_PREFIX, handle)),
            Phase::Abort => IdempotencyKey(format!("{}{}", Self::ABORT_PREFIX, handle)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_compensation(&self) -> bool {
        self.0.starts_with(Self::ABORT_PREFIX)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an attempt of a job does against its gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    /// Move funds in `flow` direction with the counterparty
    Submit { flow: Flow },
    /// Undo `prior` by moving funds in `flow` direction, once `prior` is known settled
    Compensate { flow: Flow, prior: String },
    /// Wait for an externally initiated transaction to settle
    Verify { reference: String },
}

/// Everything needed to create a job, captured from the first phase call
#[derive(Debug, Clone)]
pub struct JobSeed {
    pub action: JobAction,
    pub external_reference: IdempotencyKey,
    pub rail: String,
    pub counterparty: String,
    pub amount: Decimal,
    pub symbol: String,
    pub command_handle: String,
}

#[derive(Debug, Clone)]
pub struct SettlementJob {
    pub key: JobKey,
    pub status: JobStatus,
    pub action: JobAction,
    /// Computed once at creation, never recomputed
    pub external_reference: IdempotencyKey,
    pub rail: String,
    pub counterparty: String,
    pub amount: Decimal,
    pub symbol: String,
    pub command_handle: String,
    /// Reference reported by the gateway on settlement
    pub settled_reference: Option<String>,
    pub error: Option<JobError>,
    /// Last retryable failure, kept for diagnostics
    pub last_error: Option<String>,
    /// Launches so far (PENDING → RUNNING)
    pub attempts: u32,
    pub status_checks: u32,
    /// The current RUNNING episode has reached the external system
    pub submitted: bool,
    /// An attempt or status probe task is outstanding
    pub in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementJob {
    pub fn new(key: JobKey, seed: JobSeed) -> Self {
        let now = Utc::now();
        Self {
            key,
            status: JobStatus::Pending,
            action: seed.action,
            external_reference: seed.external_reference,
            rail: seed.rail,
            counterparty: seed.counterparty,
            amount: seed.amount,
            symbol: seed.symbol,
            command_handle: seed.command_handle,
            settled_reference: None,
            error: None,
            last_error: None,
            attempts: 0,
            status_checks: 0,
            submitted: false,
            in_flight: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference a status probe asks the gateway about
    pub fn probe_reference(&self) -> &str {
        match &self.action {
            JobAction::Verify { reference } => reference,
            _ => self.external_reference.as_str(),
        }
    }
}
