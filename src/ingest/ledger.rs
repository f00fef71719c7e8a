//! Ledger intents and the sink that submits them

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::error::IngestError;
use crate::config::LedgerConfig;
use crate::settlement::adapter::TXN_ID_FIELD;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Claim {
    /// Mint `amount` onto `target`
    Issue {
        symbol: String,
        target: String,
        amount: Decimal,
    },
    Transfer {
        symbol: String,
        source: String,
        target: String,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerIntent {
    /// Deterministic per deposit; the ledger rejects a second intent with the same handle
    pub handle: String,
    pub claims: Vec<Claim>,
    pub custom: Map<String, Value>,
}

impl LedgerIntent {
    /// Issue onto the bridge's book, then move it to the depositor
    pub fn deposit(
        symbol: &str,
        tx_hash: &str,
        book_wallet: &str,
        depositor: &str,
        amount: Decimal,
    ) -> Self {
        let mut custom = Map::new();
        custom.insert(TXN_ID_FIELD.to_string(), Value::String(tx_hash.to_string()));
        Self {
            handle: format!("deposit-{}-{}", symbol, tx_hash),
            claims: vec![
                Claim::Issue {
                    symbol: symbol.to_string(),
                    target: book_wallet.to_string(),
                    amount,
                },
                Claim::Transfer {
                    symbol: symbol.to_string(),
                    source: book_wallet.to_string(),
                    target: depositor.to_string(),
                    amount,
                },
            ],
            custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// The ledger already holds an intent with this handle
    Duplicate,
}

#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn submit(&self, intent: &LedgerIntent) -> Result<Submission, IngestError>;
}

pub struct HttpLedgerSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLedgerSink {
    pub fn new(config: &LedgerConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| IngestError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: format!("{}/v2/intents", config.url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl LedgerSink for HttpLedgerSink {
    async fn submit(&self, intent: &LedgerIntent) -> Result<Submission, IngestError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(intent)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(intent = %intent.handle, "Ledger intent accepted");
            return Ok(Submission::Accepted);
        }
        if status == reqwest::StatusCode::CONFLICT {
            debug!(intent = %intent.handle, "Ledger intent already exists");
            return Ok(Submission::Duplicate);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IngestError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
