//! Periodic poll loop.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::orchestrator::{CycleReport, SyncOrchestrator};

/// Runs cycles on a fixed interval. Cycles never overlap: the next tick is
/// only awaited once the current cycle has finished.
pub struct SyncScheduler {
    orchestrator: SyncOrchestrator,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(orchestrator: SyncOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs a cycle immediately, then every `interval` until `shutdown` fires.
    /// The token is also handed to each cycle so retries stop waiting.
    /// Returns the number of cycles run.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.orchestrator.run_cycle(&shutdown).await;
            cycles += 1;
            log_report(&report);

            if shutdown.is_cancelled() {
                break;
            }
        }

        info!("Sync scheduler stopping after {} cycles", cycles);
        self.orchestrator.shutdown().await;
        cycles
    }
}

fn log_report(report: &CycleReport) {
    if let Some(error) = &report.connection_error {
        warn!("Cycle ended early: {}", error);
        return;
    }
    if report.failed_chunks > 0 || report.archive_failures > 0 || report.store_errors > 0 {
        warn!(
            failed_chunks = report.failed_chunks,
            archive_failures = report.archive_failures,
            store_errors = report.store_errors,
            "Cycle completed with errors"
        );
    }
}
