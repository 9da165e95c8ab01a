//! Background award sweeper
//!
//! A long-lived cooperative loop owned by the mesh runtime: wakes on a
//! fixed interval, runs one sweep pass, and keeps going on recoverable
//! errors. Cancellation is observed between ticks.

use super::ContractEngine;
use crate::time_provider::SharedTimeProvider;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodic driver for [`ContractEngine::sweep_once`]
pub struct AwardSweeper {
    engine: ContractEngine,
    interval: Duration,
    time: SharedTimeProvider,
}

impl AwardSweeper {
    /// Builds a sweeper over the engine
    pub fn new(engine: ContractEngine, interval: Duration, time: SharedTimeProvider) -> Self {
        Self {
            engine,
            interval,
            time,
        }
    }

    /// Runs until the token is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "award sweeper started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.time.sleep(self.interval) => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.engine.sweep_once().await {
                error!(error = %e, "sweep tick failed");
            }
        }
        info!("award sweeper stopped");
    }
}
