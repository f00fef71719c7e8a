//! Settlement Worker
//!
//! Background tick that moves idle jobs forward when nobody is polling them.
//! Bank settlements suspend without a resume hint, so this is what carries
//! them to a terminal state between orchestrator calls.

use std::time::Duration;
use tracing::{debug, info};

use super::coordinator::SettlementCoordinator;
use crate::config::SettlementConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to re-drive idle jobs
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
        }
    }
}

impl From<&SettlementConfig> for WorkerConfig {
    fn from(config: &SettlementConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
        }
    }
}

pub struct SettlementWorker {
    coordinator: SettlementCoordinator,
    config: WorkerConfig,
}

impl SettlementWorker {
    pub fn new(coordinator: SettlementCoordinator, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run forever
    pub async fn run(&self) -> ! {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "Starting settlement worker"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick_once();
        }
    }

    pub fn tick_once(&self) -> usize {
        let driven = self.coordinator.tick();
        if driven > 0 {
            debug!(
                driven,
                live_jobs = self.coordinator.store().len(),
                "Settlement tick"
            );
        }
        driven
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_from_settlement() {
        let config = WorkerConfig::from(&SettlementConfig {
            max_attempts: 1,
            max_status_checks: 1,
            tick_interval_ms: 250,
            ..SettlementConfig::default()
        });
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(WorkerConfig::default().tick_interval, Duration::from_secs(10));
    }
}
