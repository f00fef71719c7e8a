use thiserror::Error;

use crate::gateway::chain::ChainError;
use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("invalid amount: {0}")]
    Money(#[from] MoneyError),

    #[error("ledger unreachable: {0}")]
    Transport(String),

    #[error("ledger rejected intent with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl IngestError {
    /// Whether the same submission can succeed later without changes
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Transport(_) => true,
            IngestError::Chain(ChainError::Unreachable(_) | ChainError::Transport(_)) => true,
            IngestError::Rejected { status, .. } => *status >= 500 || matches!(status, 408 | 429),
            IngestError::Chain(_) | IngestError::Money(_) => false,
        }
    }
}
