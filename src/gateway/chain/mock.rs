//! In-memory node for chain gateway and poller tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ChainError, ChainRpc, IncomingTransfer, TxObservation};

#[derive(Default)]
pub struct MockChainRpc {
    height: AtomicU64,
    balance: Mutex<u128>,
    /// (from, to, amount, hash)
    broadcasts: Mutex<Vec<(String, String, u128, String)>>,
    broadcast_error: Mutex<Option<ChainError>>,
    observations: Mutex<HashMap<String, TxObservation>>,
    transfers: Mutex<Vec<IncomingTransfer>>,
    incoming_error: Mutex<Option<String>>,
    scans: Mutex<Vec<(u64, u64)>>,
}

impl MockChainRpc {
    pub fn new() -> Self {
        let rpc = Self::default();
        *rpc.balance.lock().unwrap() = u128::MAX / 2;
        rpc
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn confirm(&self, tx_hash: &str, confirmations: u64, success: bool) {
        self.observations.lock().unwrap().insert(
            tx_hash.to_string(),
            TxObservation::Included {
                confirmations,
                success,
            },
        );
    }

    /// Fail the next broadcast with `error`
    pub fn fail_broadcast(&self, error: ChainError) {
        *self.broadcast_error.lock().unwrap() = Some(error);
    }

    pub fn add_transfer(&self, transfer: IncomingTransfer) {
        self.transfers.lock().unwrap().push(transfer);
    }

    /// Fail every scan until cleared with `None`
    pub fn fail_incoming(&self, message: Option<&str>) {
        *self.incoming_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn broadcasts(&self) -> Vec<(String, String, u128, String)> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    /// Scanned windows, in call order
    pub fn scans(&self) -> Vec<(u64, u64)> {
        self.scans.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn latest_height(&self) -> Result<u64, ChainError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: &str) -> Result<u128, ChainError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn broadcast(&self, from: &str, to: &str, amount: u128) -> Result<String, ChainError> {
        if let Some(e) = self.broadcast_error.lock().unwrap().take() {
            return Err(e);
        }
        let mut broadcasts = self.broadcasts.lock().unwrap();
        let tx_hash = format!("{:064x}", broadcasts.len() + 1);
        broadcasts.push((from.to_string(), to.to_string(), amount, tx_hash.clone()));
        Ok(tx_hash)
    }

    async fn observe(&self, tx_hash: &str) -> Result<TxObservation, ChainError> {
        Ok(self
            .observations
            .lock()
            .unwrap()
            .get(tx_hash)
            .copied()
            .unwrap_or(TxObservation::NotFound))
    }

    async fn incoming(
        &self,
        _address: &str,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<IncomingTransfer>, ChainError> {
        if let Some(message) = self.incoming_error.lock().unwrap().clone() {
            return Err(ChainError::Unreachable(message));
        }
        self.scans.lock().unwrap().push((from_height, to_height));
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.height > from_height && t.height <= to_height)
            .cloned()
            .collect())
    }
}
