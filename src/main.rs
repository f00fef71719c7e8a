//! Settlement Bridge - service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌────────────┐    ┌──────────┐
//! │  Config  │───▶│ Gateways │───▶│ Coordinator│───▶│ HTTP API │
//! │  (YAML)  │    │ BTC/ETH/ │    │ + Worker   │    │ (axum)   │
//! └──────────┘    │ Bank     │    └────────────┘    └──────────┘
//!                 └────┬─────┘
//!                      ▼
//!                 NetworkPoller ──▶ Ledger
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use settlement_bridge::api::{self, AppState};
use settlement_bridge::config::{BridgeConfig, ChainKind};
use settlement_bridge::gateway::bank::HttpSoapTransport;
use settlement_bridge::gateway::chain::{BitcoindRpc, ChainRpc, EvmRpc};
use settlement_bridge::gateway::{AssetProfile, BankGateway, ChainGateway, Gateway};
use settlement_bridge::ingest::{HttpLedgerSink, LedgerSink, NetworkPoller};
use settlement_bridge::settlement::{
    CoordinatorConfig, ErrorClassifier, JobStore, RecipientKind, Schema, SettlementAdapter,
    SettlementCoordinator, SettlementRouter, SettlementWorker, WorkerConfig,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// One rail with the resume hint its adapters report
struct Rail {
    gateway: Arc<dyn Gateway>,
    resume_after_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = BridgeConfig::load(&env).with_context(|| format!("loading {} config", env))?;
    let _log_guard = settlement_bridge::logging::init_logging(&config);

    info!(env = %env, version = env!("GIT_HASH"), "Starting settlement bridge");

    let classifier = ErrorClassifier::new(config.classifier.clone());
    let mut rails = Vec::new();
    let mut chain_gateways = Vec::new();

    for asset in &config.chains {
        let rpc: Arc<dyn ChainRpc> = match asset.kind {
            ChainKind::Utxo => Arc::new(BitcoindRpc::new(&asset.rpc)?),
            ChainKind::Account => Arc::new(EvmRpc::new(&asset.rpc)?),
        };
        let profile = AssetProfile::from_config(asset)
            .with_context(|| format!("chain asset {}", asset.symbol))?;
        let gateway = Arc::new(ChainGateway::new(profile, rpc));
        chain_gateways.push(gateway.clone());
        rails.push(Rail {
            gateway,
            resume_after_secs: asset.resume_after_secs,
        });
    }

    if let Some(bank) = &config.bank {
        let transport = Arc::new(HttpSoapTransport::new(bank)?);
        let gateway = BankGateway::new(bank, classifier.clone(), transport)
            .with_context(|| format!("bank asset {}", bank.symbol))?;
        rails.push(Rail {
            gateway: Arc::new(gateway),
            resume_after_secs: bank.resume_after_secs,
        });
    }

    if rails.is_empty() {
        warn!("No rails configured, every intent will be refused");
    }

    // ============================================================
    // SETTLEMENT
    // ============================================================

    let coordinator = SettlementCoordinator::new(
        Arc::new(JobStore::new()),
        rails.iter().map(|r| r.gateway.clone()).collect(),
        CoordinatorConfig::from(&config.settlement),
    );

    let mut router = SettlementRouter::new();
    for rail in &rails {
        for schema in [Schema::Credit, Schema::Debit] {
            let adapter = SettlementAdapter::new(
                schema,
                rail.gateway.clone(),
                coordinator.clone(),
                rail.resume_after_secs,
            );
            router.register(rail.gateway.rail(), RecipientKind::Direct, Arc::new(adapter));
        }
        info!(rail = %rail.gateway.rail(), "Rail routed");
    }

    let worker = SettlementWorker::new(coordinator, WorkerConfig::from(&config.settlement));
    tokio::spawn(async move {
        worker.run().await;
    });

    // ============================================================
    // INGESTION
    // ============================================================

    match (&config.ledger, config.poller.enabled) {
        (Some(ledger), true) => {
            let sink: Arc<dyn LedgerSink> = Arc::new(HttpLedgerSink::new(ledger)?);
            for gateway in chain_gateways {
                let poller = NetworkPoller::new(gateway, sink.clone(), config.poller.clone());
                tokio::spawn(async move {
                    poller.run().await;
                });
            }
        }
        (None, true) => warn!("Poller enabled but no ledger configured, deposits are not ingested"),
        (_, false) => info!("Network poller disabled"),
    }

    // ============================================================
    // HTTP
    // ============================================================

    let state = Arc::new(AppState {
        router,
        version: env!("GIT_HASH"),
    });
    api::serve(state, &config.api.host, config.api.port)
        .await
        .context("settlement API stopped")?;
    Ok(())
}
