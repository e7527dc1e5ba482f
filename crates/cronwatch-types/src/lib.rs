use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sender recorded on heartbeats synthesized by the monitor.
pub const ALERT_SENDER: &str = "system";
/// Receiver recorded on heartbeats synthesized by the monitor.
pub const ALERT_RECEIVER: &str = "admin";
/// Error excerpt stored on a missed-execution alert.
pub const MISSED_EXECUTION_MESSAGE: &str = "Expected cron execution message not received";
/// Upper bound, in characters, of a heartbeat's error excerpt.
pub const ERROR_EXCERPT_MAX_CHARS: usize = 255;

/// Prefix of the display name given to auto-registered jobs.
pub const AUTO_DETECTED_PREFIX: &str = "Auto detected: ";

/// Truncate an error excerpt to [`ERROR_EXCERPT_MAX_CHARS`] characters.
pub fn truncate_excerpt(text: &str) -> String {
    text.chars().take(ERROR_EXCERPT_MAX_CHARS).collect()
}

// ──────────────────── Server Types ────────────────────

/// Optional owner of a group of servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub name: String,
}

/// A monitored host. Provisioned by operators, read-only to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: String,
    /// Short name, unique within the owning customer.
    pub name: String,
    /// Fully-qualified domain name, used as a fallback lookup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Last time the server was observed doing anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Liveness of a server derived from its last activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Active,
    Inactive,
}

impl Server {
    /// `Active` when the server was seen within the last 24 hours.
    pub fn status(&self, now: DateTime<Utc>) -> ServerStatus {
        match self.last_activity_at {
            Some(seen) if seen > now - Duration::hours(24) => ServerStatus::Active,
            _ => ServerStatus::Inactive,
        }
    }
}

/// Fields an operator supplies to provision a server.
#[derive(Debug, Clone, Default)]
pub struct NewServer {
    pub name: String,
    pub fqdn: Option<String>,
    pub customer_id: Option<String>,
}

// ──────────────────── Schedule Types ────────────────────

/// Recurrence granularity of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGroup {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodGroup::Daily => "daily",
            PeriodGroup::Weekly => "weekly",
            PeriodGroup::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored or user-supplied period group is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown period group: {0}")]
pub struct UnknownPeriodGroup(pub String);

impl FromStr for PeriodGroup {
    type Err = UnknownPeriodGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PeriodGroup::Daily),
            "weekly" => Ok(PeriodGroup::Weekly),
            "monthly" => Ok(PeriodGroup::Monthly),
            other => Err(UnknownPeriodGroup(other.to_string())),
        }
    }
}

/// Recurrence descriptor of a job.
///
/// Every field is optional because operator-entered rows may be incomplete.
/// Incomplete descriptors are kept as-is and simply cannot be evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_group: Option<PeriodGroup>,
    /// Hour of day, 0-23.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_hour: Option<u32>,
    /// Minute of hour, 0-59.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_min: Option<u32>,
    /// Days after Monday, 0-6. Weekly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_dweek: Option<u32>,
    /// Day of month, 1-31. Monthly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_dmon: Option<u32>,
}

impl Schedule {
    pub fn daily(hour: u32, min: u32) -> Self {
        Self {
            period_group: Some(PeriodGroup::Daily),
            period_hour: Some(hour),
            period_min: Some(min),
            ..Default::default()
        }
    }

    pub fn weekly(dweek: u32, hour: u32, min: u32) -> Self {
        Self {
            period_group: Some(PeriodGroup::Weekly),
            period_hour: Some(hour),
            period_min: Some(min),
            period_dweek: Some(dweek),
            period_dmon: None,
        }
    }

    pub fn monthly(dmon: u32, hour: u32, min: u32) -> Self {
        Self {
            period_group: Some(PeriodGroup::Monthly),
            period_hour: Some(hour),
            period_min: Some(min),
            period_dweek: None,
            period_dmon: Some(dmon),
        }
    }

    /// Whether every field the period group requires is present and in range.
    pub fn is_well_formed(&self) -> bool {
        let time_ok = matches!(self.period_hour, Some(h) if h <= 23)
            && matches!(self.period_min, Some(m) if m <= 59);
        match self.period_group {
            Some(PeriodGroup::Daily) => time_ok,
            Some(PeriodGroup::Weekly) => time_ok && matches!(self.period_dweek, Some(d) if d <= 6),
            Some(PeriodGroup::Monthly) => {
                time_ok && matches!(self.period_dmon, Some(d) if (1..=31).contains(&d))
            }
            None => false,
        }
    }
}

// ──────────────────── Job Types ────────────────────

/// A monitored recurring task on one server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub server_id: String,
    /// Display name.
    pub name: String,
    /// Literal command line as reported in notifications.
    pub command: String,
    /// User the command runs as.
    pub cron_user: String,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub active: bool,
    pub deleted: bool,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A job is monitored iff it is active, not deleted and valid.
    pub fn is_monitored(&self) -> bool {
        self.active && !self.deleted && self.valid
    }

    pub fn is_auto_detected(&self) -> bool {
        self.name.starts_with(AUTO_DETECTED_PREFIX)
    }
}

/// Fields needed to create a job. `valid` is derived from the schedule.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub server_id: String,
    pub name: String,
    pub command: String,
    pub cron_user: String,
    pub schedule: Schedule,
    pub active: bool,
}

// ──────────────────── Heartbeat Types ────────────────────

/// One reported execution of a job, or a synthetic missed-execution alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    pub id: String,
    pub job_id: String,
    /// When the remote execution reportedly completed.
    pub sent_at: DateTime<Utc>,
    /// When the notification was observed.
    pub received_at: DateTime<Utc>,
    pub sender: String,
    pub receiver: String,
    pub alert: bool,
    /// Error excerpt, at most [`ERROR_EXCERPT_MAX_CHARS`] characters. May be empty.
    pub error: String,
}

impl Heartbeat {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        if self.alert {
            format!("ALERT: {}", self.error)
        } else {
            format!(
                "OK: {} -> {} at {}",
                self.sender,
                self.receiver,
                self.sent_at.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

/// A heartbeat not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHeartbeat {
    pub job_id: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub sender: String,
    pub receiver: String,
    pub alert: bool,
    pub error: String,
}

impl NewHeartbeat {
    /// Normal heartbeat built from a received notification.
    pub fn received(
        job_id: &str,
        envelope: &Envelope,
        received_at: DateTime<Utc>,
        error: String,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            sent_at: envelope.sent_at,
            received_at,
            sender: envelope.from.clone(),
            receiver: envelope.to.clone(),
            alert: false,
            error: truncate_excerpt(&error),
        }
    }

    /// Synthetic alert for an execution that was expected but not reported.
    pub fn missed_execution(job_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            sent_at: now,
            received_at: now,
            sender: ALERT_SENDER.to_string(),
            receiver: ALERT_RECEIVER.to_string(),
            alert: true,
            error: MISSED_EXECUTION_MESSAGE.to_string(),
        }
    }
}

// ──────────────────── Ingestion Types ────────────────────

/// A decoded notification message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Result of ingesting one envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A heartbeat was stored, against a newly registered job when `new_job` is set.
    Recorded { heartbeat: Heartbeat, new_job: bool },
    /// Neither a server name nor an FQDN matched.
    ServerNotFound { server_name: String },
    /// The store rejected a read or write.
    PersistenceError { details: String },
    /// The subject does not look like a cron notification.
    InvalidFormat,
}

// ──────────────────── Monitoring Types ────────────────────

/// Result of checking one job against its schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The latest heartbeat satisfies the schedule, or the schedule cannot be evaluated.
    Ok,
    /// The execution was missed and a new alert heartbeat was stored.
    Missed { alert_heartbeat: Heartbeat },
    /// The execution was missed but an alert already exists for this period.
    Suppressed { previous_alert: Heartbeat },
}

/// How repeated missed checks are turned into alert heartbeats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Store a new alert on every missed check.
    EveryCheck,
    /// Store at most one alert per schedule period.
    #[default]
    OncePerPeriod,
}
