//! cronwatch-storage: persistence for servers, jobs and heartbeats.
//!
//! The monitor and the ingestion pipeline only see the [`Store`] trait.
//! [`SqliteStore`] is the bundled implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use cronwatch_types::{
    Customer, Heartbeat, Job, NewHeartbeat, NewJob, NewServer, PeriodGroup, Schedule, Server,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A uniqueness constraint rejected the write.
    #[error("Already exists: {0}")]
    Conflict(String),
    #[error("Connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Filter for heartbeat listings. Results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatQuery {
    /// Only heartbeats sent strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    pub alerts_only: bool,
}

/// Record access used by the monitor and the ingestion pipeline.
///
/// Implementations must reject a second job with the same
/// `(server_id, command, cron_user)` with [`StorageError::Conflict`].
pub trait Store: Send + Sync {
    // ─── Servers ───────────────────────────────────

    fn create_customer(&self, name: &str) -> Result<Customer>;
    fn create_server(&self, server: &NewServer) -> Result<Server>;
    fn find_server_by_name(&self, name: &str) -> Result<Option<Server>>;
    fn find_server_by_fqdn(&self, fqdn: &str) -> Result<Option<Server>>;
    fn list_servers(&self) -> Result<Vec<Server>>;
    /// Record activity on a server.
    fn touch_server(&self, server_id: &str, at: DateTime<Utc>) -> Result<bool>;
    /// Remove a server together with its jobs and their heartbeats.
    fn delete_server(&self, server_id: &str) -> Result<bool>;

    // ─── Jobs ──────────────────────────────────────

    fn create_job(&self, job: &NewJob) -> Result<Job>;
    fn get_job(&self, job_id: &str) -> Result<Option<Job>>;
    fn find_job(&self, server_id: &str, command: &str, cron_user: &str) -> Result<Option<Job>>;
    fn list_jobs(&self) -> Result<Vec<Job>>;
    fn list_jobs_by_server(&self, server_id: &str) -> Result<Vec<Job>>;
    fn list_jobs_by_period(&self, group: PeriodGroup) -> Result<Vec<Job>>;
    /// Jobs that are active, not deleted and valid.
    fn list_monitored_jobs(&self) -> Result<Vec<Job>>;
    /// Replace a job's schedule and recompute its `valid` flag.
    fn update_job_schedule(&self, job_id: &str, schedule: &Schedule) -> Result<bool>;
    fn set_job_active(&self, job_id: &str, active: bool) -> Result<bool>;
    fn soft_delete_job(&self, job_id: &str) -> Result<bool>;

    // ─── Heartbeats ────────────────────────────────

    fn create_heartbeat(&self, heartbeat: &NewHeartbeat) -> Result<Heartbeat>;
    /// Most recent heartbeat by send time.
    fn latest_heartbeat(&self, job_id: &str) -> Result<Option<Heartbeat>>;
    fn list_heartbeats(&self, job_id: &str, query: &HeartbeatQuery) -> Result<Vec<Heartbeat>>;
}
