//! Settlement Coordinator
//!
//! Drives settlement jobs through the state machine. Phase calls never wait
//! on a gateway: they read the job, pick a [`Decision`], and start at most one
//! background attempt or status probe. Outcomes land in the store and are
//! picked up by the next call or the background tick.
//!
//! # Safety Invariants
//!
//! 1. **Single attempt**: only the caller that wins PENDING → RUNNING starts an attempt
//! 2. **Mark-before-submit**: `submitted` is recorded before the gateway call
//! 3. **Never resubmit while pending**: a StillPending job is probed, not resubmitted
//! 4. **Compensate only settled work**: a compensation first confirms the prior operation settled

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classifier::Classification;
use super::error::{FailureReason, JobError, SettlementError};
use super::state::JobStatus;
use super::store::JobStore;
use super::types::{JobAction, JobKey, JobSeed, Phase, SettlementJob};
use crate::config::SettlementConfig;
use crate::gateway::{Flow, Gateway, GatewayResult, PaymentOrder};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub max_attempts: u32,
    pub max_status_checks: u32,
    /// Lifetime of a settled prepare reference awaiting commit
    pub reference_retention: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&SettlementConfig::default())
    }
}

impl From<&SettlementConfig> for CoordinatorConfig {
    fn from(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_status_checks: config.max_status_checks,
            reference_retention: Duration::from_secs(config.reference_retention_secs),
        }
    }
}

/// Final outcome of a terminal job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Settled(Option<String>),
    Failed(JobError),
}

/// What to do with a job given its current record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// PENDING: start an attempt
    Launch,
    /// RUNNING, submitted, nothing outstanding: ask the gateway for status
    Probe,
    /// RUNNING with an attempt or probe outstanding
    Wait,
    /// Terminal: hand the outcome to the caller
    Resolve(Resolution),
}

impl Decision {
    pub fn for_job(job: &SettlementJob) -> Self {
        match job.status {
            JobStatus::Pending => Decision::Launch,
            JobStatus::Running if job.submitted && !job.in_flight => Decision::Probe,
            JobStatus::Running => Decision::Wait,
            JobStatus::Completed => {
                Decision::Resolve(Resolution::Settled(job.settled_reference.clone()))
            }
            JobStatus::Failed => Decision::Resolve(Resolution::Failed(job.error.clone().unwrap_or_else(
                || JobError::new(FailureReason::UnexpectedError, "failed without detail"),
            ))),
        }
    }
}

/// Result of observing a job from a phase call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    InFlight,
    Resolved(Resolution),
}

/// `Ok(None)`: nothing had to be done (e.g. nothing to compensate)
type AttemptResult = Result<Option<GatewayResult>, SettlementError>;

#[derive(Clone)]
pub struct SettlementCoordinator {
    store: Arc<JobStore>,
    gateways: Arc<HashMap<String, Arc<dyn Gateway>>>,
    config: CoordinatorConfig,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<JobStore>,
        gateways: Vec<Arc<dyn Gateway>>,
        config: CoordinatorConfig,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|g| (g.rail().to_string(), g))
            .collect();
        Self {
            store,
            gateways: Arc::new(gateways),
            config,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn gateway(&self, rail: &str) -> Option<Arc<dyn Gateway>> {
        self.gateways.get(rail).cloned()
    }

    /// Get or create the job for `key` and move it forward one step.
    ///
    /// A terminal job is removed from the store once its outcome is returned.
    pub fn observe(&self, key: &JobKey, seed: impl FnOnce() -> JobSeed) -> Observation {
        let (job, created) = self.store.get_or_create(key, seed);
        if created {
            info!(
                job = %key,
                rail = %job.rail,
                reference = %job.external_reference,
                amount = %job.amount,
                "Settlement job created"
            );
        }

        match Decision::for_job(&job) {
            Decision::Launch => {
                self.launch(key);
                Observation::InFlight
            }
            Decision::Probe => {
                self.probe(key);
                Observation::InFlight
            }
            Decision::Wait => Observation::InFlight,
            Decision::Resolve(resolution) => {
                if self.store.remove_terminal(key).is_some()
                    && key.phase == Phase::Prepare
                    && let Resolution::Settled(Some(reference)) = &resolution
                {
                    self.store.record_settlement(&key.handle, reference);
                }
                debug!(job = %key, status = %job.status, "Terminal job consumed");
                Observation::Resolved(resolution)
            }
        }
    }

    /// Move every idle job forward once. Returns the number of jobs driven.
    pub fn tick(&self) -> usize {
        let expired = self.store.purge_settlements(self.config.reference_retention);
        if expired > 0 {
            debug!(expired, "Expired settled references");
        }
        let mut driven = 0;
        for key in self.store.runnable() {
            let Some(job) = self.store.get(&key) else {
                continue;
            };
            let started = match Decision::for_job(&job) {
                Decision::Launch => self.launch(&key),
                Decision::Probe => self.probe(&key),
                Decision::Wait | Decision::Resolve(_) => false,
            };
            if started {
                driven += 1;
            }
        }
        driven
    }

    // ============================================================
    // LAUNCH & PROBE
    // ============================================================

    fn launch(&self, key: &JobKey) -> bool {
        let Some(job) = self
            .store
            .transition(key, JobStatus::Pending, JobStatus::Running, |j| {
                j.attempts += 1;
                j.submitted = false;
                j.in_flight = true;
            })
        else {
            debug!(job = %key, "Launch skipped, job no longer PENDING");
            return false;
        };

        if job.attempts > self.config.max_attempts {
            let err = SettlementError::RetryLimitExceeded {
                attempts: job.attempts - 1,
            };
            self.fail(key, JobError::from(&err));
            return false;
        }

        let Some(gateway) = self.gateway(&job.rail) else {
            self.fail(
                key,
                JobError::new(
                    FailureReason::IntentUnrelated,
                    format!("no gateway registered for rail {}", job.rail),
                ),
            );
            return false;
        };

        info!(
            job = %key,
            attempt = job.attempts,
            reference = %job.external_reference,
            "Launching settlement attempt"
        );

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.attempt(&job, gateway.as_ref()).await;
            this.apply(&job.key, result, false);
        });
        true
    }

    fn probe(&self, key: &JobKey) -> bool {
        let Some(job) = self.store.try_begin_probe(key) else {
            return false;
        };
        let Some(gateway) = self.gateway(&job.rail) else {
            self.fail(
                key,
                JobError::new(
                    FailureReason::IntentUnrelated,
                    format!("no gateway registered for rail {}", job.rail),
                ),
            );
            return false;
        };

        debug!(
            job = %key,
            reference = %job.probe_reference(),
            checks = job.status_checks,
            "Probing settlement status"
        );

        let this = self.clone();
        tokio::spawn(async move {
            let result = gateway.query_status(job.probe_reference()).await;
            this.apply(&job.key, Ok(Some(result)), true);
        });
        true
    }

    // ============================================================
    // ATTEMPTS
    // ============================================================

    async fn attempt(&self, job: &SettlementJob, gateway: &dyn Gateway) -> AttemptResult {
        match &job.action {
            JobAction::Verify { reference } => {
                self.mark_submitted(&job.key);
                Ok(Some(gateway.query_status(reference).await))
            }
            JobAction::Submit { flow } => self.submit(job, gateway, *flow).await.map(Some),
            JobAction::Compensate { flow, prior } => {
                match gateway.query_status(prior).await {
                    GatewayResult::Settled(_) => {}
                    GatewayResult::Failed(f) if f.not_found || f.unsettled => {
                        info!(job = %job.key, prior = %prior, failure = %f, "Nothing to compensate");
                        return Ok(None);
                    }
                    // A refused status check says nothing about whether funds moved
                    GatewayResult::Failed(f) if f.classification == Classification::Fatal => {
                        warn!(job = %job.key, prior = %prior, failure = %f, "Prior outcome unknown");
                        return Err(SettlementError::ExternalUnknown {
                            code: f.code,
                            message: format!("status of {} unknown: {}", prior, f.message),
                        });
                    }
                    GatewayResult::Failed(f) => {
                        return Err(SettlementError::GatewayUnavailable(format!(
                            "status of {} unresolved: {}",
                            prior, f
                        )));
                    }
                    GatewayResult::StillPending => {
                        return Err(SettlementError::GatewayUnavailable(format!(
                            "{} still pending, compensation deferred",
                            prior
                        )));
                    }
                }

                if *flow == Flow::Inbound && !gateway.can_pull() {
                    return Err(SettlementError::Irreversible(format!(
                        "{} cannot collect back settled payment {}",
                        gateway.rail(),
                        prior
                    )));
                }
                self.submit(job, gateway, *flow).await.map(Some)
            }
        }
    }

    async fn submit(
        &self,
        job: &SettlementJob,
        gateway: &dyn Gateway,
        flow: Flow,
    ) -> Result<GatewayResult, SettlementError> {
        let destination = gateway.validate_destination(&job.counterparty).await?;

        if flow == Flow::Outbound {
            let available = gateway.check_available_balance().await?;
            if available < job.amount {
                return Err(SettlementError::InsufficientBalance {
                    required: job.amount,
                    available,
                });
            }
        }

        let order = PaymentOrder {
            flow,
            destination,
            amount: job.amount,
            symbol: job.symbol.clone(),
            memo: job.command_handle.clone(),
        };

        self.mark_submitted(&job.key);
        Ok(gateway.submit_payment(&order, &job.external_reference).await)
    }

    fn mark_submitted(&self, key: &JobKey) {
        self.store
            .transition(key, JobStatus::Running, JobStatus::Running, |j| {
                j.submitted = true;
            });
    }

    // ============================================================
    // OUTCOMES
    // ============================================================

    fn apply(&self, key: &JobKey, result: AttemptResult, probe: bool) {
        match result {
            Ok(None) => self.complete(key, None),
            Ok(Some(GatewayResult::Settled(reference))) => self.complete(key, Some(reference)),
            Ok(Some(GatewayResult::StillPending)) => self.keep_running(key, probe, None),
            Ok(Some(GatewayResult::Failed(failure))) => match failure.classification {
                Classification::Fatal => self.fail(
                    key,
                    JobError::new(FailureReason::TransactionRejected, failure.to_string()),
                ),
                Classification::Pending => self.keep_running(key, probe, Some(failure.to_string())),
                // A status probe that could not reach the rail says nothing about the payment
                Classification::Retryable if probe && !failure.not_found => {
                    self.keep_running(key, probe, Some(failure.to_string()))
                }
                Classification::Retryable => self.requeue(key, failure.to_string()),
            },
            Err(e) => match e.classification() {
                Classification::Fatal => self.fail(key, JobError::from(&e)),
                Classification::Pending => self.keep_running(key, probe, Some(e.to_string())),
                Classification::Retryable => self.requeue(key, e.to_string()),
            },
        }
    }

    fn complete(&self, key: &JobKey, reference: Option<String>) {
        let logged = reference.clone().unwrap_or_default();
        if self
            .store
            .transition(key, JobStatus::Running, JobStatus::Completed, |j| {
                j.settled_reference = reference;
                j.in_flight = false;
            })
            .is_some()
        {
            info!(job = %key, reference = %logged, "Settlement completed");
        }
    }

    fn fail(&self, key: &JobKey, error: JobError) {
        let logged = error.to_string();
        if self
            .store
            .transition(key, JobStatus::Running, JobStatus::Failed, |j| {
                j.error = Some(error);
                j.in_flight = false;
            })
            .is_some()
        {
            warn!(job = %key, error = %logged, "Settlement failed");
        }
    }

    fn requeue(&self, key: &JobKey, reason: String) {
        warn!(job = %key, reason = %reason, "Retryable failure, job back to PENDING");
        self.store
            .transition(key, JobStatus::Running, JobStatus::Pending, |j| {
                j.submitted = false;
                j.in_flight = false;
                j.last_error = Some(reason);
            });
    }

    fn keep_running(&self, key: &JobKey, probe: bool, note: Option<String>) {
        let Some(job) = self
            .store
            .transition(key, JobStatus::Running, JobStatus::Running, |j| {
                j.in_flight = false;
                if probe {
                    j.status_checks += 1;
                }
                if note.is_some() {
                    j.last_error = note;
                }
            })
        else {
            return;
        };

        if !job.submitted {
            // Nothing reached the rail, so there is nothing to probe
            self.requeue(key, "no submission to check".to_string());
            return;
        }

        if job.status_checks > self.config.max_status_checks {
            let err = SettlementError::ExternalPending(format!(
                "still pending after {} status checks",
                job.status_checks
            ));
            self.fail(
                key,
                JobError::new(FailureReason::RetryLimitExceeded, err.to_string()),
            );
            return;
        }

        debug!(job = %key, checks = job.status_checks, "Still pending remotely");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayFailure;
    use crate::gateway::mock::ScriptedGateway;
    use crate::settlement::types::IdempotencyKey;
    use rust_decimal::Decimal;

    fn seed(action: JobAction) -> JobSeed {
        JobSeed {
            action,
            external_reference: IdempotencyKey::for_phase(Phase::Prepare, "h1"),
            rail: "mock".into(),
            counterparty: "dest".into(),
            amount: Decimal::from(10),
            symbol: "btc".into(),
            command_handle: "cmd-1".into(),
        }
    }

    fn submit_seed() -> JobSeed {
        seed(JobAction::Submit {
            flow: Flow::Outbound,
        })
    }

    fn setup(gateway: Arc<ScriptedGateway>, config: CoordinatorConfig) -> SettlementCoordinator {
        let gateways: Vec<Arc<dyn Gateway>> = vec![gateway];
        SettlementCoordinator::new(Arc::new(JobStore::new()), gateways, config)
    }

    /// Observe until the job resolves
    async fn settle(coordinator: &SettlementCoordinator, key: &JobKey) -> Resolution {
        for _ in 0..200 {
            if let Observation::Resolved(r) = coordinator.observe(key, submit_seed) {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not resolve", key);
    }

    #[test]
    fn test_decision_table() {
        let mut job = SettlementJob::new(JobKey::new(Phase::Prepare, "h1"), submit_seed());
        assert_eq!(Decision::for_job(&job), Decision::Launch);

        job.status = JobStatus::Running;
        job.in_flight = true;
        assert_eq!(Decision::for_job(&job), Decision::Wait);

        job.submitted = true;
        job.in_flight = false;
        assert_eq!(Decision::for_job(&job), Decision::Probe);

        job.status = JobStatus::Completed;
        job.settled_reference = Some("tx".into());
        assert_eq!(
            Decision::for_job(&job),
            Decision::Resolve(Resolution::Settled(Some("tx".into())))
        );
    }

    #[tokio::test]
    async fn test_settles_after_probe() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.push_status(GatewayResult::Settled("tx-1".into()));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        assert_eq!(coordinator.observe(&key, submit_seed), Observation::InFlight);
        let resolution = settle(&coordinator, &key).await;

        assert_eq!(resolution, Resolution::Settled(Some("tx-1".into())));
        assert_eq!(gateway.submit_count(), 1);
        assert!(coordinator.store().get(&key).is_none());
    }

    #[tokio::test]
    async fn test_fatal_failure_resolves_failed() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.set_submit_result(GatewayResult::Failed(GatewayFailure::fatal("99", "rejected")));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        match settle(&coordinator, &key).await {
            Resolution::Failed(e) => {
                assert_eq!(e.reason, FailureReason::TransactionRejected);
                assert!(e.detail.contains("rejected"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retryable_failures_hit_attempt_cap() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.set_submit_result(GatewayResult::Failed(GatewayFailure::retryable(
            "system",
            "connection refused",
        )));
        let config = CoordinatorConfig {
            max_attempts: 3,
            max_status_checks: 10,
            ..CoordinatorConfig::default()
        };
        let coordinator = setup(gateway.clone(), config);
        let key = JobKey::new(Phase::Prepare, "h1");

        match settle(&coordinator, &key).await {
            Resolution::Failed(e) => assert_eq!(e.reason, FailureReason::RetryLimitExceeded),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gateway.submit_count(), 3);
        assert_eq!(gateway.submits_for("h1"), 3);
    }

    #[tokio::test]
    async fn test_status_check_cap() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        let config = CoordinatorConfig {
            max_attempts: 5,
            max_status_checks: 2,
            ..CoordinatorConfig::default()
        };
        let coordinator = setup(gateway.clone(), config);
        let key = JobKey::new(Phase::Prepare, "h1");

        match settle(&coordinator, &key).await {
            Resolution::Failed(e) => assert_eq!(e.reason, FailureReason::RetryLimitExceeded),
            other => panic!("unexpected {:?}", other),
        }
        // Pending work is only ever probed
        assert_eq!(gateway.submit_count(), 1);
        assert_eq!(gateway.query_count(), 3);
    }

    #[tokio::test]
    async fn test_probe_transport_fault_does_not_resubmit() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.push_status(GatewayResult::Failed(GatewayFailure::retryable(
            "system",
            "timeout",
        )));
        gateway.push_status(GatewayResult::Settled("tx-9".into()));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        assert_eq!(
            settle(&coordinator, &key).await,
            Resolution::Settled(Some("tx-9".into()))
        );
        assert_eq!(gateway.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_on_probe_resubmits_same_key() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        let mut missing = GatewayFailure::retryable("189", "no existe");
        missing.not_found = true;
        gateway.push_status(GatewayResult::Failed(missing));
        gateway.push_status(GatewayResult::Settled("tx-2".into()));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        assert_eq!(
            settle(&coordinator, &key).await,
            Resolution::Settled(Some("tx-2".into()))
        );
        assert_eq!(gateway.submits_for("h1"), 2);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_fatal() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.set_balance(Decimal::from(1));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        match settle(&coordinator, &key).await {
            Resolution::Failed(e) => assert_eq!(e.reason, FailureReason::InsufficientBalance),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gateway.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_settled_prepare_reference_kept_until_expiry() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.set_submit_result(GatewayResult::Settled("tx-5".into()));
        let config = CoordinatorConfig {
            reference_retention: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        let coordinator = setup(gateway.clone(), config);
        let key = JobKey::new(Phase::Prepare, "h1");

        settle(&coordinator, &key).await;
        assert_eq!(
            coordinator.store().settled_reference("h1").as_deref(),
            Some("tx-5")
        );

        coordinator.tick();
        assert_eq!(coordinator.store().settled_reference("h1"), None);
    }

    #[tokio::test]
    async fn test_tick_drives_without_caller() {
        let gateway = Arc::new(ScriptedGateway::new("mock"));
        gateway.set_submit_result(GatewayResult::Settled("tx-3".into()));
        let coordinator = setup(gateway.clone(), CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        coordinator.store().get_or_create(&key, submit_seed);
        assert_eq!(coordinator.tick(), 1);

        for _ in 0..100 {
            if coordinator.store().get(&key).map(|j| j.status) == Some(JobStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let job = coordinator.store().get(&key).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // Tick never consumes terminal jobs
        assert_eq!(coordinator.tick(), 0);
        assert!(coordinator.store().get(&key).is_some());
    }

    #[tokio::test]
    async fn test_unknown_rail_fails() {
        let gateway = Arc::new(ScriptedGateway::new("other"));
        let coordinator = setup(gateway, CoordinatorConfig::default());
        let key = JobKey::new(Phase::Prepare, "h1");

        match settle(&coordinator, &key).await {
            Resolution::Failed(e) => assert_eq!(e.reason, FailureReason::IntentUnrelated),
            other => panic!("unexpected {:?}", other),
        }
    }
}
