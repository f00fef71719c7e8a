//! Scripted gateway for tests

use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct ScriptedGateway {
    rail: String,
    can_pull: bool,
    /// Count of each operation type
    submit_count: AtomicUsize,
    query_count: AtomicUsize,
    submits_by_key: Mutex<HashMap<String, usize>>,
    queried: Mutex<Vec<String>>,
    /// Configured behavior
    balance: Mutex<Decimal>,
    reject_destination: Mutex<bool>,
    submit_result: Mutex<GatewayResult>,
    status_script: Mutex<VecDeque<GatewayResult>>,
    status_default: Mutex<GatewayResult>,
    submit_delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new(rail: &str) -> Self {
        Self {
            rail: rail.to_string(),
            can_pull: false,
            submit_count: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
            submits_by_key: Mutex::new(HashMap::new()),
            queried: Mutex::new(Vec::new()),
            balance: Mutex::new(Decimal::from(1_000_000)),
            reject_destination: Mutex::new(false),
            submit_result: Mutex::new(GatewayResult::StillPending),
            status_script: Mutex::new(VecDeque::new()),
            status_default: Mutex::new(GatewayResult::StillPending),
            submit_delay: Mutex::new(None),
        }
    }

    pub fn pulling(mut self) -> Self {
        self.can_pull = true;
        self
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_reject_destination(&self, reject: bool) {
        *self.reject_destination.lock().unwrap() = reject;
    }

    pub fn set_submit_result(&self, result: GatewayResult) {
        *self.submit_result.lock().unwrap() = result;
    }

    /// Results returned by the next status queries, in order
    pub fn push_status(&self, result: GatewayResult) {
        self.status_script.lock().unwrap().push_back(result);
    }

    /// Result returned once the script is exhausted
    pub fn set_status_default(&self, result: GatewayResult) {
        *self.status_default.lock().unwrap() = result;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn submits_for(&self, key: &str) -> usize {
        self.submits_by_key
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn rail(&self) -> &str {
        &self.rail
    }

    fn can_pull(&self) -> bool {
        self.can_pull
    }

    async fn validate_destination(&self, identifier: &str) -> Result<Destination, SettlementError> {
        if *self.reject_destination.lock().unwrap() {
            return Err(SettlementError::InvalidDestination(identifier.to_string()));
        }
        Ok(Destination::Address(identifier.to_string()))
    }

    async fn check_available_balance(&self) -> Result<Decimal, SettlementError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn submit_payment(&self, _order: &PaymentOrder, key: &IdempotencyKey) -> GatewayResult {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        *self
            .submits_by_key
            .lock()
            .unwrap()
            .entry(key.as_str().to_string())
            .or_insert(0) += 1;
        self.submit_result.lock().unwrap().clone()
    }

    async fn query_status(&self, reference: &str) -> GatewayResult {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.queried.lock().unwrap().push(reference.to_string());
        let next = self.status_script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.status_default.lock().unwrap().clone())
    }
}
