use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::settlement::classifier::ClassifierConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub api: ApiConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// One entry per blockchain asset the bridge settles
    #[serde(default)]
    pub chains: Vec<ChainAssetConfig>,
    #[serde(default)]
    pub bank: Option<BankConfig>,
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Job lifecycle limits
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Launches (PENDING → RUNNING) allowed per job before it is failed
    pub max_attempts: u32,
    /// Status probes allowed per job before it is failed
    pub max_status_checks: u32,
    /// Background re-drive interval
    pub tick_interval_ms: u64,
    /// How long a settled prepare reference stays available to commit
    #[serde(default = "default_reference_retention_secs")]
    pub reference_retention_secs: u64,
}

fn default_reference_retention_secs() -> u64 {
    86_400
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_status_checks: 720,
            tick_interval_ms: 10_000,
            reference_retention_secs: default_reference_retention_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Bitcoin-style UTXO chain served by bitcoind
    Utxo,
    /// Ethereum-style account chain served over JSON-RPC
    Account,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainAssetConfig {
    pub symbol: String,
    /// Ledger identifier schema, e.g. `bitcoin` in `bitcoin:<address>@<wallet>`
    pub schema: String,
    pub kind: ChainKind,
    pub network: String,
    pub decimals: u32,
    pub required_confirmations: u64,
    #[serde(default = "default_chain_resume_secs")]
    pub resume_after_secs: Option<u64>,
    /// Bridge-owned address funds are paid from and deposited to
    pub custodial_address: String,
    /// Ledger wallet that holds the bridge's book for this asset
    pub wallet: String,
    pub rpc: RpcConfig,
}

fn default_chain_resume_secs() -> Option<u64> {
    Some(5)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankConfig {
    pub symbol: String,
    pub url: String,
    #[serde(default)]
    pub soap_action: Option<String>,
    pub entity: String,
    pub user: String,
    pub password: String,
    /// First hex half of the AES-128 key
    pub key1: String,
    /// Second hex half of the AES-128 key
    pub key2: String,
    /// Bridge-owned account at the bank
    pub virtual_account: String,
    /// Operation origin code (ORIGOPER)
    pub operation_origin: String,
    #[serde(default = "default_source_document")]
    pub source_document: String,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_bank_decimals")]
    pub decimals: u32,
    #[serde(default)]
    pub products: ProductCodes,
    #[serde(default)]
    pub verify_accounts: bool,
    /// Bank settlements suspend without a hint unless set
    #[serde(default)]
    pub resume_after_secs: Option<u64>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub businesses: Vec<BusinessConfig>,
}

fn default_source_document() -> String {
    "0".to_string()
}

fn default_source_name() -> String {
    "VA".to_string()
}

fn default_bank_decimals() -> u32 {
    2
}

/// Product codes selecting the bank operation behind the single SOAP method
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProductCodes {
    pub account_lookup: u32,
    pub balance: u32,
    pub submit: u32,
    pub status: u32,
}

impl Default for ProductCodes {
    fn default() -> Self {
        Self {
            account_lookup: 1,
            balance: 2,
            submit: 3,
            status: 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusinessConfig {
    /// Ledger handle, e.g. `bs:291003695@coopcentral`
    pub handle: String,
    pub name: String,
    pub account: String,
    pub document: String,
    /// Single-letter document type (C, E, P, U, T, N)
    pub document_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub url: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Blocks behind the watermark re-read on every pass
    pub rescan_depth: u64,
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Furthest the watermark may trail the tip while a deposit keeps failing
    #[serde(default = "default_max_lag_blocks")]
    pub max_lag_blocks: u64,
}

fn default_max_lag_blocks() -> u64 {
    1_000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            rescan_depth: 6,
            start_height: None,
            max_lag_blocks: default_max_lag_blocks(),
        }
    }
}

impl BridgeConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "settlement.max_attempts must be at least 1".into(),
            ));
        }
        let mut symbols: Vec<&str> = self.chains.iter().map(|c| c.symbol.as_str()).collect();
        if let Some(bank) = &self.bank {
            symbols.push(bank.symbol.as_str());
        }
        symbols.sort_unstable();
        if let Some(dup) = symbols.windows(2).find(|w| w[0].eq_ignore_ascii_case(w[1])) {
            return Err(ConfigError::Invalid(format!(
                "asset symbol configured twice: {}",
                dup[0]
            )));
        }
        Ok(())
    }
}
