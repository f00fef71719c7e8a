//! Deposit ingestion
//!
//! One [`NetworkPoller`] per chain asset watches the custodial address and
//! hands each new deposit to the ledger as an issue + transfer intent keyed
//! by the transaction hash.

pub mod error;
pub mod ledger;
pub mod poller;

pub use error::IngestError;
pub use ledger::{Claim, HttpLedgerSink, LedgerIntent, LedgerSink, Submission};
pub use poller::{DeadLetter, NetworkPoller, PollReport};
