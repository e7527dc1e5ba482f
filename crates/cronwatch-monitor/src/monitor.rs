//! Per-job missed-execution check.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::{debug, warn};

use cronwatch_storage::{Result, Store};
use cronwatch_types::{AlertPolicy, CheckOutcome, Heartbeat, Job, NewHeartbeat};

use crate::schedule::{expected_occurrence, grace_period, period_start};

/// Judges whether a job's latest heartbeat satisfies its schedule.
///
/// Calling [`check`](Self::check) twice for the same job concurrently may
/// write two alerts; callers serialize per-job checks.
pub struct HeartbeatMonitor {
    store: Arc<dyn Store>,
    policy: AlertPolicy,
    offset: FixedOffset,
}

impl HeartbeatMonitor {
    /// Create a monitor using the UTC calendar and the default alert policy.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            policy: AlertPolicy::default(),
            offset: Utc.fix(),
        }
    }

    pub fn with_policy(mut self, policy: AlertPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Calendar offset used for day, week and month boundaries.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Check one job, writing at most one alert heartbeat.
    pub fn check(&self, job: &Job, now: DateTime<Utc>) -> Result<CheckOutcome> {
        let local_now = now.with_timezone(&self.offset);
        let Some(expected) = expected_occurrence(&job.schedule, &local_now) else {
            debug!(job_id = %job.id, "Schedule cannot be evaluated, skipping");
            return Ok(CheckOutcome::Ok);
        };
        let deadline = expected.with_timezone(&Utc) - grace_period(job.schedule.period_group);

        let latest = self.store.latest_heartbeat(&job.id)?;
        if latest.as_ref().is_some_and(|heartbeat| heartbeat.sent_at >= deadline) {
            return Ok(CheckOutcome::Ok);
        }

        if let Some(previous_alert) = self.alert_in_current_period(latest, &local_now, job) {
            debug!(job_id = %job.id, "Missed execution already alerted this period");
            return Ok(CheckOutcome::Suppressed { previous_alert });
        }

        let alert_heartbeat = self
            .store
            .create_heartbeat(&NewHeartbeat::missed_execution(&job.id, now))?;
        warn!(
            job_id = %job.id,
            command = %job.command,
            cron_user = %job.cron_user,
            expected = %expected,
            "Missed cron execution"
        );
        Ok(CheckOutcome::Missed { alert_heartbeat })
    }

    fn alert_in_current_period(
        &self,
        latest: Option<Heartbeat>,
        local_now: &DateTime<FixedOffset>,
        job: &Job,
    ) -> Option<Heartbeat> {
        if self.policy != AlertPolicy::OncePerPeriod {
            return None;
        }
        let previous = latest.filter(|heartbeat| heartbeat.alert)?;
        let start = period_start(job.schedule.period_group?, local_now)?;
        (previous.sent_at >= start.with_timezone(&Utc)).then_some(previous)
    }
}
