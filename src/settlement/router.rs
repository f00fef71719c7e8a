//! Settlement Router
//!
//! Explicit routing table from (schema, asset symbol, recipient kind) to the
//! adapter that settles it. Resolved once per call at intake.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::adapter::SettlementAdapter;
use super::error::SettlementError;
use super::types::{AdapterResult, Phase, Schema, TransactionContext};

/// Custom context flag marking an exchange recipient
pub const EXCHANGE_FLAG: &str = "exchange";
/// Wallet suffix marking an exchange recipient (`<id>@exchange`)
pub const EXCHANGE_WALLET: &str = "exchange";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    Direct,
    Exchange,
}

impl RecipientKind {
    /// Kind of the external party of `ctx`: the target of a credit, the source of a debit
    pub fn of(schema: Schema, ctx: &TransactionContext) -> Self {
        let party = match schema {
            Schema::Credit => &ctx.counterparty.target,
            Schema::Debit => &ctx.counterparty.source,
        };
        let wallet = party.rsplit_once('@').map(|(_, wallet)| wallet);
        if ctx.custom_flag(EXCHANGE_FLAG) || wallet == Some(EXCHANGE_WALLET) {
            RecipientKind::Exchange
        } else {
            RecipientKind::Direct
        }
    }
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientKind::Direct => f.write_str("direct"),
            RecipientKind::Exchange => f.write_str("exchange"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub schema: Schema,
    pub symbol: String,
    pub recipient: RecipientKind,
}

impl RouteKey {
    pub fn new(schema: Schema, symbol: &str, recipient: RecipientKind) -> Self {
        Self {
            schema,
            symbol: symbol.to_ascii_lowercase(),
            recipient,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} to {} recipient", self.schema, self.symbol, self.recipient)
    }
}

#[derive(Default)]
pub struct SettlementRouter {
    routes: HashMap<RouteKey, Arc<SettlementAdapter>>,
}

impl SettlementRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: &str, recipient: RecipientKind, adapter: Arc<SettlementAdapter>) {
        let key = RouteKey::new(adapter.schema(), symbol, recipient);
        if self.routes.insert(key.clone(), adapter).is_some() {
            warn!(route = %key, "Route registered twice, keeping the last adapter");
        }
    }

    pub fn resolve(&self, schema: Schema, ctx: &TransactionContext) -> Result<Arc<SettlementAdapter>, SettlementError> {
        let key = RouteKey::new(schema, &ctx.symbol, RecipientKind::of(schema, ctx));
        self.routes
            .get(&key)
            .cloned()
            .ok_or_else(|| SettlementError::Unrouted(key.to_string()))
    }

    pub fn dispatch(&self, schema: Schema, phase: Phase, ctx: &TransactionContext) -> AdapterResult {
        match self.resolve(schema, ctx) {
            Ok(adapter) => adapter.handle(phase, ctx),
            Err(e) => {
                warn!(job = %ctx.job_handle, phase = %phase, error = %e, "Unroutable intent");
                AdapterResult::from(&e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
