//! Job Store
//!
//! In-memory record of in-flight settlement attempts, keyed by
//! (phase, job handle). Status only changes through compare-and-set
//! against the expected prior status, so concurrent callers cannot both
//! move a job to RUNNING.
//!
//! Consumed prepare jobs leave their settled rail reference behind, keyed by
//! job handle, until commit or abort asks for it or it ages out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tracing::warn;

use super::state::JobStatus;
use super::types::{JobKey, JobSeed, SettlementJob};

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<JobKey, SettlementJob>,
    /// handle → (rail reference of the settled prepare, recorded at)
    settled: DashMap<String, (String, DateTime<Utc>)>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live job for `key`, creating it from `seed` if absent.
    ///
    /// The flag is true when this call created the job.
    pub fn get_or_create(
        &self,
        key: &JobKey,
        seed: impl FnOnce() -> JobSeed,
    ) -> (SettlementJob, bool) {
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let job = SettlementJob::new(key.clone(), seed());
                e.insert(job.clone());
                (job, true)
            }
        }
    }

    pub fn get(&self, key: &JobKey) -> Option<SettlementJob> {
        self.jobs.get(key).map(|j| j.clone())
    }

    pub fn compare_and_set_status(&self, key: &JobKey, expected: JobStatus, next: JobStatus) -> bool {
        self.transition(key, expected, next, |_| {}).is_some()
    }

    /// CAS `expected → next`, applying `mutate` to the job under the same lock.
    ///
    /// Returns the updated job, or `None` if the job is gone, its status is not
    /// `expected`, or the edge is not part of the state machine.
    pub fn transition(
        &self,
        key: &JobKey,
        expected: JobStatus,
        next: JobStatus,
        mutate: impl FnOnce(&mut SettlementJob),
    ) -> Option<SettlementJob> {
        let mut job = self.jobs.get_mut(key)?;
        if job.status != expected {
            return None;
        }
        if !expected.can_transition_to(next) {
            warn!(job = %key, from = %expected, to = %next, "Rejected illegal job transition");
            return None;
        }
        mutate(&mut *job);
        job.status = next;
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    /// Claim an idle RUNNING job for a status probe
    pub fn try_begin_probe(&self, key: &JobKey) -> Option<SettlementJob> {
        let mut job = self.jobs.get_mut(key)?;
        if job.status != JobStatus::Running || !job.submitted || job.in_flight {
            return None;
        }
        job.in_flight = true;
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    /// Remove a job whose terminal status has been consumed
    pub fn remove_terminal(&self, key: &JobKey) -> Option<SettlementJob> {
        self.jobs
            .remove_if(key, |_, job| job.status.is_terminal())
            .map(|(_, job)| job)
    }

    pub fn remove(&self, key: &JobKey) -> Option<SettlementJob> {
        self.jobs.remove(key).map(|(_, job)| job)
    }

    /// Jobs the background worker can move forward right now
    pub fn runnable(&self) -> Vec<JobKey> {
        self.jobs
            .iter()
            .filter(|j| match j.status {
                JobStatus::Pending => true,
                JobStatus::Running => j.submitted && !j.in_flight,
                JobStatus::Completed | JobStatus::Failed => false,
            })
            .map(|j| j.key().clone())
            .collect()
    }

    // ============================================================
    // SETTLED REFERENCES
    // ============================================================

    pub fn record_settlement(&self, handle: &str, reference: &str) {
        self.settled
            .insert(handle.to_string(), (reference.to_string(), Utc::now()));
    }

    pub fn settled_reference(&self, handle: &str) -> Option<String> {
        self.settled.get(handle).map(|entry| entry.value().0.clone())
    }

    pub fn forget_settlement(&self, handle: &str) {
        self.settled.remove(handle);
    }

    /// Drop references older than `max_age`. Returns how many were dropped.
    pub fn purge_settlements(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let before = self.settled.len();
        self.settled.retain(|_, (_, at)| {
            (now - *at)
                .to_std()
                .map_or(true, |age| age < max_age)
        });
        before.saturating_sub(self.settled.len())
    }

    /// Number of live jobs; settled references are not counted
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Flow;
    use crate::settlement::types::{IdempotencyKey, JobAction, Phase};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn seed(handle: &str) -> JobSeed {
        JobSeed {
            action: JobAction::Submit {
                flow: Flow::Outbound,
            },
            external_reference: IdempotencyKey::for_phase(Phase::Prepare, handle),
            rail: "btc".into(),
            counterparty: "bitcoin:addr".into(),
            amount: Decimal::ONE,
            symbol: "btc".into(),
            command_handle: "cmd".into(),
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = JobStore::new();
        let key = JobKey::new(Phase::Prepare, "h1");

        let (job, created) = store.get_or_create(&key, || seed("h1"));
        assert!(created);
        assert_eq!(job.status, JobStatus::Pending);

        let (again, created) = store.get_or_create(&key, || panic!("seed must not be used"));
        assert!(!created);
        assert_eq!(again.external_reference, job.external_reference);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_phases_have_separate_jobs() {
        let store = JobStore::new();
        store.get_or_create(&JobKey::new(Phase::Prepare, "h1"), || seed("h1"));
        store.get_or_create(&JobKey::new(Phase::Abort, "h1"), || seed("h1"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_compare_and_set() {
        let store = JobStore::new();
        let key = JobKey::new(Phase::Prepare, "h1");
        store.get_or_create(&key, || seed("h1"));

        assert!(!store.compare_and_set_status(&key, JobStatus::Running, JobStatus::Completed));
        assert!(store.compare_and_set_status(&key, JobStatus::Pending, JobStatus::Running));
        assert!(!store.compare_and_set_status(&key, JobStatus::Pending, JobStatus::Running));
        assert!(store.compare_and_set_status(&key, JobStatus::Running, JobStatus::Completed));
        // Terminal: nothing leaves COMPLETED
        assert!(!store.compare_and_set_status(&key, JobStatus::Completed, JobStatus::Running));
    }

    #[test]
    fn test_settled_reference_survives_reads() {
        let store = JobStore::new();
        assert_eq!(store.settled_reference("h1"), None);

        store.record_settlement("h1", "IDTX-1");
        assert_eq!(store.settled_reference("h1").as_deref(), Some("IDTX-1"));
        assert_eq!(store.settled_reference("h1").as_deref(), Some("IDTX-1"));
        assert!(store.is_empty());

        store.forget_settlement("h1");
        assert_eq!(store.settled_reference("h1"), None);
    }

    #[test]
    fn test_purge_drops_only_expired_references() {
        let store = JobStore::new();
        store.record_settlement("old", "IDTX-1");
        store.settled.alter("old", |_, (r, at)| (r, at - chrono::Duration::hours(2)));
        store.record_settlement("new", "IDTX-2");

        assert_eq!(store.purge_settlements(Duration::from_secs(3600)), 1);
        assert_eq!(store.settled_reference("old"), None);
        assert_eq!(store.settled_reference("new").as_deref(), Some("IDTX-2"));
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let store = JobStore::new();
        let key = JobKey::new(Phase::Prepare, "h1");
        store.get_or_create(&key, || seed("h1"));

        assert!(!store.compare_and_set_status(&key, JobStatus::Pending, JobStatus::Completed));
        assert_eq!(store.get(&key).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_single_winner_under_contention() {
        let store = Arc::new(JobStore::new());
        let key = JobKey::new(Phase::Prepare, "h1");
        store.get_or_create(&key, || seed("h1"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    store.compare_and_set_status(&key, JobStatus::Pending, JobStatus::Running)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_remove_terminal_only() {
        let store = JobStore::new();
        let key = JobKey::new(Phase::Prepare, "h1");
        store.get_or_create(&key, || seed("h1"));

        assert!(store.remove_terminal(&key).is_none());
        store.compare_and_set_status(&key, JobStatus::Pending, JobStatus::Running);
        store.compare_and_set_status(&key, JobStatus::Running, JobStatus::Failed);
        assert!(store.remove_terminal(&key).is_some());
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn test_probe_claim() {
        let store = JobStore::new();
        let key = JobKey::new(Phase::Prepare, "h1");
        store.get_or_create(&key, || seed("h1"));
        assert!(store.try_begin_probe(&key).is_none());

        store.transition(&key, JobStatus::Pending, JobStatus::Running, |j| {
            j.submitted = true;
        });
        assert_eq!(store.runnable(), vec![key.clone()]);
        assert!(store.try_begin_probe(&key).is_some());
        assert!(store.try_begin_probe(&key).is_none());
        assert!(store.runnable().is_empty());
    }
}
