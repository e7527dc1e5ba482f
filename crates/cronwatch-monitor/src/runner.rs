//! Monitoring loop that checks every monitored job once per tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use cronwatch_storage::{Result, Store};
use cronwatch_types::CheckOutcome;

use crate::monitor::HeartbeatMonitor;

/// Tally of one monitoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub checked: usize,
    pub missed: usize,
    pub suppressed: usize,
    pub failed: usize,
}

/// Drives [`HeartbeatMonitor::check`] over all monitored jobs.
pub struct MonitorRunner {
    store: Arc<dyn Store>,
    monitor: HeartbeatMonitor,
}

impl MonitorRunner {
    pub fn new(store: Arc<dyn Store>, monitor: HeartbeatMonitor) -> Self {
        Self { store, monitor }
    }

    /// Check each monitored job once, in sequence.
    ///
    /// Fails only when the job list cannot be loaded; a failing job is
    /// logged and counted.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let jobs = self.store.list_monitored_jobs()?;
        let mut report = TickReport::default();
        for job in jobs {
            report.checked += 1;
            match self.monitor.check(&job, now) {
                Ok(CheckOutcome::Ok) => {}
                Ok(CheckOutcome::Missed { .. }) => report.missed += 1,
                Ok(CheckOutcome::Suppressed { .. }) => report.suppressed += 1,
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to check job: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run a pass every `every` until `shutdown` turns true or its sender drops.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Monitor started, checking every {}s", every.as_secs());
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let runner = self.clone();
                    match tokio::task::spawn_blocking(move || runner.run_once(Utc::now())).await {
                        Ok(Ok(report)) if report.missed > 0 || report.failed > 0 => {
                            info!(
                                checked = report.checked,
                                missed = report.missed,
                                suppressed = report.suppressed,
                                failed = report.failed,
                                "Monitoring pass finished"
                            );
                        }
                        Ok(Ok(report)) => debug!(checked = report.checked, "Monitoring pass finished"),
                        Ok(Err(e)) => warn!("Monitoring pass failed: {e}"),
                        Err(e) => warn!("Monitoring pass aborted: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Monitor stopped");
    }
}
