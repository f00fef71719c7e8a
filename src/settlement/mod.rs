//! Settlement Job Lifecycle
//!
//! Bridges the orchestrator's three-phase contract (prepare / commit / abort)
//! to asynchronous, non-idempotent payment rails.
//!
//! # Architecture
//!
//! ```text
//! orchestrator ─▶ SettlementRouter ─▶ SettlementAdapter ─▶ SettlementCoordinator
//!                 (schema, symbol,     (phase plan per      (JobStore CAS +
//!                  recipient kind)      schema)              background attempts)
//!                                                                 │
//!                                                                 ▼
//!                                                              Gateway
//! ```
//!
//! # State Machine
//!
//! ```text
//! PENDING → RUNNING → COMPLETED
//!    ▲         │  ↺  → FAILED
//!    └─────────┘
//! ```
//!
//! # Safety Invariants
//!
//! 1. **One job per (phase, handle)**, created idempotently
//! 2. **CAS-only status changes**, so one attempt per job at a time
//! 3. **Deterministic idempotency keys** stored on the job at creation
//! 4. **Abort never compensates** a prepare that has not completed

pub mod adapter;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod router;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;


// Re-exports for convenience
pub use adapter::SettlementAdapter;
pub use classifier::{Classification, ClassifierConfig, ErrorClassifier};
pub use coordinator::{CoordinatorConfig, Decision, SettlementCoordinator};
pub use error::{FailureReason, JobError, SettlementError};
pub use router::{RecipientKind, SettlementRouter};
pub use state::JobStatus;
pub use store::JobStore;
pub use types::{
    AdapterResult, Counterparty, IdempotencyKey, JobKey, Phase, Schema, SettlementJob,
    TransactionContext,
};
pub use worker::{SettlementWorker, WorkerConfig};
