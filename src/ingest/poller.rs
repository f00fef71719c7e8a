//! Network Poller
//!
//! Turns confirmed transfers into the bridge's custodial address into ledger
//! intents.
//!
//! Each pass scans `(watermark - rescan_depth, tip]`. The rescan window
//! catches transfers a node reports late; a bounded `seen` map keeps them
//! from being submitted twice and is pruned as the window moves.
//!
//! A transient failure (ledger or node unreachable, 5xx) holds the watermark
//! below the failed transfer so the next pass retries it, but never more than
//! `max_lag_blocks` behind the tip. A permanent failure (the ledger refused
//! the intent, the amount does not convert) is logged and kept in a bounded
//! dead-letter list instead; retrying it cannot succeed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::error::IngestError;
use super::ledger::{LedgerIntent, LedgerSink, Submission};
use crate::config::PollerConfig;
use crate::gateway::chain::{ChainGateway, IncomingTransfer};
use crate::money;

/// Dead letters kept for inspection; oldest dropped first
const DEAD_LETTER_CAPACITY: usize = 1024;

/// A deposit the poller gave up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub tx_hash: String,
    pub height: u64,
    pub error: String,
}

#[derive(Debug, Default)]
struct PollState {
    /// Highest height fully ingested
    watermark: Option<u64>,
    /// tx hash -> height, for transfers already handed to the ledger or abandoned
    seen: HashMap<String, u64>,
    dead_letters: VecDeque<DeadLetter>,
}

impl PollState {
    fn abandon(&mut self, transfer: &IncomingTransfer, error: String) {
        self.seen.insert(transfer.tx_hash.clone(), transfer.height);
        if self.dead_letters.len() == DEAD_LETTER_CAPACITY {
            self.dead_letters.pop_front();
        }
        self.dead_letters.push_back(DeadLetter {
            tx_hash: transfer.tx_hash.clone(),
            height: transfer.height,
            error,
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub tip: u64,
    pub watermark: u64,
    pub submitted: usize,
    pub skipped: usize,
    /// Transient failures, retried on a later pass
    pub failed: usize,
    /// Dead-lettered this pass
    pub rejected: usize,
}

pub struct NetworkPoller {
    gateway: Arc<ChainGateway>,
    sink: Arc<dyn LedgerSink>,
    config: PollerConfig,
    state: Mutex<PollState>,
}

impl NetworkPoller {
    pub fn new(gateway: Arc<ChainGateway>, sink: Arc<dyn LedgerSink>, config: PollerConfig) -> Self {
        Self {
            gateway,
            sink,
            config,
            state: Mutex::new(PollState::default()),
        }
    }

    /// Poll forever
    pub async fn run(&self) -> ! {
        let profile = self.gateway.profile();
        info!(
            symbol = %profile.symbol,
            address = %profile.custodial_address,
            poll_interval_ms = self.config.poll_interval_ms,
            rescan_depth = self.config.rescan_depth,
            "Starting network poller"
        );

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.poll_once().await {
                Ok(report) if report.submitted > 0 || report.failed > 0 || report.rejected > 0 => {
                    info!(symbol = %profile.symbol, ?report, "Poll pass");
                }
                Ok(_) => {}
                Err(e) => warn!(symbol = %profile.symbol, error = %e, "Poll pass failed"),
            }
        }
    }

    pub async fn poll_once(&self) -> Result<PollReport, IngestError> {
        let mut state = self.state.lock().await;
        let tip = self.gateway.latest_height().await?;
        let watermark = state
            .watermark
            .or(self.config.start_height)
            .unwrap_or(tip)
            .min(tip);
        let from = watermark.saturating_sub(self.config.rescan_depth);

        let transfers = self.gateway.incoming(from, tip).await?;
        let mut report = PollReport {
            tip,
            ..PollReport::default()
        };
        let mut retry: Vec<(IncomingTransfer, String)> = Vec::new();

        for transfer in transfers {
            if state.seen.contains_key(&transfer.tx_hash) {
                continue;
            }
            match self.ingest(&transfer).await {
                Ok(true) => {
                    report.submitted += 1;
                    state.seen.insert(transfer.tx_hash.clone(), transfer.height);
                }
                Ok(false) => {
                    report.skipped += 1;
                    state.seen.insert(transfer.tx_hash.clone(), transfer.height);
                }
                Err(e) if e.is_transient() => {
                    warn!(tx = %transfer.tx_hash, height = transfer.height, error = %e, "Deposit not ingested, will retry");
                    report.failed += 1;
                    retry.push((transfer, e.to_string()));
                }
                Err(e) => {
                    error!(tx = %transfer.tx_hash, height = transfer.height, error = %e, "Deposit refused, dead-lettered");
                    report.rejected += 1;
                    state.abandon(&transfer, e.to_string());
                }
            }
        }

        let lag_floor = tip.saturating_sub(self.config.max_lag_blocks);
        let next = match retry.iter().map(|(t, _)| t.height).min() {
            Some(height) => tip.min(height.saturating_sub(1)).max(watermark).max(lag_floor),
            None => tip,
        };
        state.watermark = Some(next);
        report.watermark = next;

        // Heights at or below the next window start are never rescanned
        let floor = next.saturating_sub(self.config.rescan_depth);
        for (transfer, e) in retry {
            if transfer.height <= floor {
                error!(tx = %transfer.tx_hash, height = transfer.height, error = %e, "Deposit retries exhausted by lag cap, dead-lettered");
                report.rejected += 1;
                state.abandon(&transfer, e);
            }
        }
        state.seen.retain(|_, height| *height > floor);

        Ok(report)
    }

    /// `Ok(false)` when the transfer is not a deposit
    async fn ingest(&self, transfer: &IncomingTransfer) -> Result<bool, IngestError> {
        let profile = self.gateway.profile();
        if transfer.amount == 0 {
            debug!(tx = %transfer.tx_hash, "Ignoring zero-amount transfer");
            return Ok(false);
        }
        let Some(sender) = transfer.sender.as_deref() else {
            warn!(tx = %transfer.tx_hash, "Ignoring transfer with unknown sender");
            return Ok(false);
        };
        if sender.eq_ignore_ascii_case(&profile.custodial_address) {
            debug!(tx = %transfer.tx_hash, "Ignoring self-originated transfer");
            return Ok(false);
        }

        let amount = money::from_base_units(transfer.amount, profile.decimals)?;
        let intent = LedgerIntent::deposit(
            &profile.symbol,
            &transfer.tx_hash,
            &profile.wallet,
            &profile.ledger_identifier(sender),
            amount,
        );
        match self.sink.submit(&intent).await? {
            Submission::Accepted => info!(
                intent = %intent.handle,
                amount = %amount,
                sender = %sender,
                height = transfer.height,
                "Deposit submitted to ledger"
            ),
            Submission::Duplicate => debug!(intent = %intent.handle, "Deposit already on ledger"),
        }
        Ok(true)
    }

    /// Deposits given up on, oldest first
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.iter().cloned().collect()
    }

    #[cfg(test)]
    async fn seen_len(&self) -> usize {
        self.state.lock().await.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainKind;
    use crate::gateway::chain::address::AddressRule;
    use crate::gateway::chain::mock::MockChainRpc;
    use crate::gateway::chain::AssetProfile;
    use crate::ingest::ledger::Claim;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex as StdMutex;

    const CUSTODY: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
    const DEPOSITOR: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    #[derive(Default)]
    struct RecordingSink {
        intents: StdMutex<Vec<LedgerIntent>>,
        failures_left: StdMutex<usize>,
        /// intent handle -> HTTP status it is always answered with
        refusals: StdMutex<HashMap<String, u16>>,
    }

    impl RecordingSink {
        fn fail_next(&self, count: usize) {
            *self.failures_left.lock().unwrap() = count;
        }

        fn refuse(&self, tx_hash: &str, status: u16) {
            self.refusals
                .lock()
                .unwrap()
                .insert(format!("deposit-btc-{}", tx_hash), status);
        }

        fn intents(&self) -> Vec<LedgerIntent> {
            self.intents.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerSink for RecordingSink {
        async fn submit(&self, intent: &LedgerIntent) -> Result<Submission, IngestError> {
            if let Some(status) = self.refusals.lock().unwrap().get(&intent.handle) {
                return Err(IngestError::Rejected {
                    status: *status,
                    body: "refused".into(),
                });
            }
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(IngestError::Transport("ledger down".into()));
            }
            self.intents.lock().unwrap().push(intent.clone());
            Ok(Submission::Accepted)
        }
    }

    fn setup(start_height: u64) -> (NetworkPoller, Arc<MockChainRpc>, Arc<RecordingSink>) {
        setup_with_lag(start_height, 1_000)
    }

    fn setup_with_lag(
        start_height: u64,
        max_lag_blocks: u64,
    ) -> (NetworkPoller, Arc<MockChainRpc>, Arc<RecordingSink>) {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.set_height(start_height);
        let profile = AssetProfile {
            symbol: "btc".into(),
            schema: "bitcoin".into(),
            wallet: "btc-book".into(),
            decimals: 8,
            required_confirmations: 1,
            custodial_address: CUSTODY.into(),
            rule: AddressRule::for_chain(ChainKind::Utxo, "mainnet").unwrap(),
        };
        let gateway = Arc::new(ChainGateway::new(profile, rpc.clone()));
        let sink = Arc::new(RecordingSink::default());
        let config = PollerConfig {
            enabled: true,
            poll_interval_ms: 10,
            rescan_depth: 3,
            start_height: Some(start_height),
            max_lag_blocks,
        };
        (NetworkPoller::new(gateway, sink.clone(), config), rpc, sink)
    }

    fn deposit(tx_hash: &str, sender: &str, amount: u128, height: u64) -> IncomingTransfer {
        IncomingTransfer {
            tx_hash: tx_hash.into(),
            sender: Some(sender.into()),
            amount,
            height,
        }
    }

    #[tokio::test]
    async fn test_deposit_observed_twice_ingested_once() {
        let (poller, rpc, sink) = setup(100);
        rpc.add_transfer(deposit("t1", DEPOSITOR, 150_000_000, 101));

        rpc.set_height(101);
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.watermark, 101);

        // Still inside the rescan window
        rpc.set_height(102);
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.submitted, 0);

        let intents = sink.intents();
        assert_eq!(intents.len(), 1);
        let amount: Decimal = "1.5".parse().unwrap();
        assert_eq!(intents[0].handle, "deposit-btc-t1");
        assert_eq!(
            intents[0].claims,
            vec![
                Claim::Issue {
                    symbol: "btc".into(),
                    target: "btc-book".into(),
                    amount,
                },
                Claim::Transfer {
                    symbol: "btc".into(),
                    source: "btc-book".into(),
                    target: format!("bitcoin:{}", DEPOSITOR),
                    amount,
                },
            ]
        );
        assert_eq!(intents[0].custom["txnId"], "t1");
    }

    #[tokio::test]
    async fn test_ignores_self_and_zero_transfers() {
        let (poller, rpc, sink) = setup(100);
        rpc.add_transfer(deposit("change", CUSTODY, 10_000, 101));
        rpc.add_transfer(deposit("dust", DEPOSITOR, 0, 101));
        rpc.add_transfer(IncomingTransfer {
            tx_hash: "anon".into(),
            sender: None,
            amount: 5,
            height: 101,
        });
        rpc.set_height(101);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.submitted, 0);
        assert_eq!(report.skipped, 3);
        assert!(sink.intents().is_empty());
    }

    #[tokio::test]
    async fn test_failed_submission_holds_watermark() {
        let (poller, rpc, sink) = setup(100);
        rpc.add_transfer(deposit("t1", DEPOSITOR, 1_000, 102));
        rpc.add_transfer(deposit("t2", DEPOSITOR, 2_000, 104));
        rpc.set_height(105);
        sink.fail_next(1);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.submitted, 1);
        assert_eq!(report.watermark, 101);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.watermark, 105);

        let handles: Vec<String> = sink.intents().into_iter().map(|i| i.handle).collect();
        assert_eq!(handles, vec!["deposit-btc-t2", "deposit-btc-t1"]);
    }

    /// A deposit the ledger refuses outright must not pin the watermark
    #[tokio::test]
    async fn test_refused_deposit_is_dead_lettered() {
        let (poller, rpc, sink) = setup(100);
        sink.refuse("bad", 400);
        rpc.add_transfer(deposit("bad", DEPOSITOR, 1_000, 101));
        rpc.set_height(101);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.watermark, 101);

        for height in 102..=200 {
            rpc.add_transfer(deposit(&format!("t{}", height), DEPOSITOR, 1_000, height));
            rpc.set_height(height);
            let report = poller.poll_once().await.unwrap();
            assert_eq!(report.submitted, 1);
            assert_eq!(report.watermark, height);
            assert!(poller.seen_len().await <= 3);
        }

        assert_eq!(sink.intents().len(), 99);
        let dead = poller.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].tx_hash, "bad");
        assert_eq!(dead[0].height, 101);
        assert!(dead[0].error.contains("400"));
    }

    /// A deposit that keeps failing transiently holds the watermark only up to the lag cap
    #[tokio::test]
    async fn test_transient_failure_bounded_by_lag_cap() {
        let (poller, rpc, sink) = setup_with_lag(100, 10);
        sink.refuse("stuck", 503);
        rpc.add_transfer(deposit("stuck", DEPOSITOR, 1_000, 102));
        rpc.set_height(105);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.watermark, 101);
        assert!(poller.dead_letters().await.is_empty());

        rpc.set_height(120);
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.watermark, 110);
        assert_eq!(poller.dead_letters().await[0].tx_hash, "stuck");

        // Abandoned: later passes leave it alone
        rpc.set_height(121);
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.watermark, 121);
        assert!(sink.intents().is_empty());
    }

    #[tokio::test]
    async fn test_scan_window_and_seen_eviction() {
        let (poller, rpc, _sink) = setup(100);
        rpc.add_transfer(deposit("t1", DEPOSITOR, 1_000, 101));
        rpc.set_height(101);
        poller.poll_once().await.unwrap();
        assert_eq!(poller.seen_len().await, 1);

        rpc.set_height(110);
        poller.poll_once().await.unwrap();
        // 101 fell below the next window start (110 - 3)
        assert_eq!(poller.seen_len().await, 0);
        assert_eq!(rpc.scans(), vec![(97, 101), (98, 110)]);
    }

    #[tokio::test]
    async fn test_chain_error_leaves_state_untouched() {
        let (poller, rpc, _sink) = setup(100);
        rpc.set_height(101);
        rpc.fail_incoming(Some("connection refused"));
        assert!(poller.poll_once().await.is_err());

        rpc.fail_incoming(None);
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.watermark, 101);
        assert_eq!(rpc.scans(), vec![(97, 101)]);
    }
}
