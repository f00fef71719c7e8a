//! Settlement Bridge
//!
//! Settles ledger intents against external payment rails through a
//! prepare / commit / abort contract, and feeds on-chain deposits back into
//! the ledger.
//!
//! # Modules
//!
//! - [`settlement`] - Job lifecycle: store, coordinator, adapters, router
//! - [`gateway`] - External rails: BTC / ETH nodes and the legacy bank
//! - [`ingest`] - Network poller turning deposits into ledger intents
//! - [`api`] - HTTP surface the orchestrator calls
//! - [`money`] - Decimal amounts and base-unit conversion
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing setup

pub mod api;
pub mod config;
pub mod gateway;
pub mod ingest;
pub mod logging;
pub mod money;
pub mod settlement;

// Convenient re-exports at crate root
pub use config::BridgeConfig;
pub use gateway::{Gateway, GatewayResult};
pub use settlement::{
    AdapterResult, Phase, Schema, SettlementAdapter, SettlementRouter, TransactionContext,
};
