//! Settlement Adapter
//!
//! The prepare/commit/abort surface the orchestrator polls. One adapter
//! type serves every rail; it is parameterized by a [`Gateway`] and the
//! [`Schema`] (credit or debit) it settles.
//!
//! | schema | prepare                      | abort                          |
//! |--------|------------------------------|--------------------------------|
//! | credit | pay the target (outbound)    | collect it back (inbound)      |
//! | debit  | collect from source, or verify the deposit `custom.txnId` | refund the source (outbound) |
//!
//! Commit needs no external call on any rail.

use std::sync::Arc;
use tracing::{debug, info};

use super::coordinator::{Observation, Resolution, SettlementCoordinator};
use super::error::SettlementError;
use super::state::JobStatus;
use super::types::{
    AdapterResult, IdempotencyKey, JobAction, JobKey, JobSeed, Phase, Schema, TransactionContext,
};
use crate::gateway::{Flow, Gateway};

/// Custom context field naming the on-chain deposit behind a debit intent
pub const TXN_ID_FIELD: &str = "txnId";

pub struct SettlementAdapter {
    schema: Schema,
    gateway: Arc<dyn Gateway>,
    coordinator: SettlementCoordinator,
    resume_after_secs: Option<u64>,
}

impl SettlementAdapter {
    pub fn new(
        schema: Schema,
        gateway: Arc<dyn Gateway>,
        coordinator: SettlementCoordinator,
        resume_after_secs: Option<u64>,
    ) -> Self {
        Self {
            schema,
            gateway,
            coordinator,
            resume_after_secs,
        }
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    pub fn rail(&self) -> &str {
        self.gateway.rail()
    }

    pub fn handle(&self, phase: Phase, ctx: &TransactionContext) -> AdapterResult {
        match phase {
            Phase::Prepare => self.prepare(ctx),
            Phase::Commit => self.commit(ctx),
            Phase::Abort => self.abort(ctx),
        }
    }

    pub fn prepare(&self, ctx: &TransactionContext) -> AdapterResult {
        let action = match self.prepare_action(ctx) {
            Ok(action) => action,
            Err(e) => {
                info!(job = %ctx.job_handle, error = %e, "Prepare rejected at intake");
                return AdapterResult::from(&e);
            }
        };
        let key = JobKey::new(Phase::Prepare, &ctx.job_handle);

        match self.observe(&key, action, ctx) {
            Observation::InFlight => self.suspended(),
            Observation::Resolved(Resolution::Settled(reference)) => {
                AdapterResult::Prepared { reference }
            }
            Observation::Resolved(Resolution::Failed(e)) => AdapterResult::from(&e),
        }
    }

    /// Prepare already moved the funds; commit only reports the rail's reference
    pub fn commit(&self, ctx: &TransactionContext) -> AdapterResult {
        let reference = self
            .coordinator
            .store()
            .settled_reference(&ctx.job_handle)
            .or_else(|| self.deposit_reference(ctx).map(str::to_string));
        debug!(job = %ctx.job_handle, schema = %self.schema, reference = ?reference, "Commit");
        AdapterResult::Committed { reference }
    }

    pub fn abort(&self, ctx: &TransactionContext) -> AdapterResult {
        let key = JobKey::new(Phase::Abort, &ctx.job_handle);
        let store = self.coordinator.store();

        if store.get(&key).is_none() {
            let prepare_key = JobKey::new(Phase::Prepare, &ctx.job_handle);
            match store.get(&prepare_key) {
                Some(prepare) if !prepare.status.is_terminal() => {
                    info!(job = %ctx.job_handle, status = %prepare.status, "Abort waits for in-flight prepare");
                    return self.suspended();
                }
                Some(prepare) if prepare.status == JobStatus::Failed => {
                    store.remove_terminal(&prepare_key);
                    info!(job = %ctx.job_handle, "Prepare failed, nothing to compensate");
                    return AdapterResult::Aborted { reference: None };
                }
                _ => {}
            }

            // Debit of a chain deposit with no deposit named: nothing happened
            if self.schema == Schema::Debit
                && !self.gateway.can_pull()
                && ctx.custom_str(TXN_ID_FIELD).is_none()
            {
                return AdapterResult::Aborted { reference: None };
            }
        }

        let action = JobAction::Compensate {
            flow: match self.schema {
                Schema::Credit => Flow::Inbound,
                Schema::Debit => Flow::Outbound,
            },
            prior: self.prior_reference(ctx),
        };

        match self.observe(&key, action, ctx) {
            Observation::InFlight => self.suspended(),
            Observation::Resolved(Resolution::Settled(reference)) => {
                store.forget_settlement(&ctx.job_handle);
                AdapterResult::Aborted { reference }
            }
            Observation::Resolved(Resolution::Failed(e)) => AdapterResult::from(&e),
        }
    }

    fn prepare_action(&self, ctx: &TransactionContext) -> Result<JobAction, SettlementError> {
        match self.schema {
            Schema::Credit => Ok(JobAction::Submit {
                flow: Flow::Outbound,
            }),
            Schema::Debit if self.gateway.can_pull() => Ok(JobAction::Submit {
                flow: Flow::Inbound,
            }),
            Schema::Debit => ctx
                .custom_str(TXN_ID_FIELD)
                .map(|reference| JobAction::Verify {
                    reference: reference.to_string(),
                })
                .ok_or_else(|| {
                    SettlementError::UnrecognizedTransaction(format!(
                        "debit {} names no deposit transaction",
                        ctx.job_handle
                    ))
                }),
        }
    }

    /// Reference of the operation prepare performed
    /// Deposit named by a chain debit; the rail's own id for it
    fn deposit_reference<'a>(&self, ctx: &'a TransactionContext) -> Option<&'a str> {
        if self.schema == Schema::Debit && !self.gateway.can_pull() {
            ctx.custom_str(TXN_ID_FIELD)
        } else {
            None
        }
    }

    fn prior_reference(&self, ctx: &TransactionContext) -> String {
        match self.deposit_reference(ctx) {
            Some(txn_id) => txn_id.to_string(),
            None => IdempotencyKey::for_phase(Phase::Prepare, &ctx.job_handle).to_string(),
        }
    }

    fn observe(&self, key: &JobKey, action: JobAction, ctx: &TransactionContext) -> Observation {
        let counterparty = match self.schema {
            Schema::Credit => &ctx.counterparty.target,
            Schema::Debit => &ctx.counterparty.source,
        };
        let seed = || JobSeed {
            action,
            external_reference: IdempotencyKey::for_phase(key.phase, &ctx.job_handle),
            rail: self.gateway.rail().to_string(),
            counterparty: counterparty.clone(),
            amount: ctx.amount,
            symbol: ctx.symbol.clone(),
            command_handle: ctx.phase_command_handle.clone(),
        };
        self.coordinator.observe(key, seed)
    }

    fn suspended(&self) -> AdapterResult {
        AdapterResult::Suspended {
            resume_after_seconds: self.resume_after_secs,
        }
    }
}
