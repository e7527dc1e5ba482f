//! SQLite-backed record store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use cronwatch_types::{
    Customer, Heartbeat, Job, NewHeartbeat, NewJob, NewServer, PeriodGroup, Schedule, Server,
};

use crate::{HeartbeatQuery, Result, StorageError, Store};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS customers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS servers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        fqdn TEXT,
        customer_id TEXT REFERENCES customers(id) ON DELETE SET NULL,
        last_activity_at INTEGER,
        created_at INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_servers_name_scope
        ON servers(name, IFNULL(customer_id, ''));
    CREATE INDEX IF NOT EXISTS idx_servers_fqdn ON servers(fqdn);

    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        command TEXT NOT NULL,
        cron_user TEXT NOT NULL,
        period_group TEXT,
        period_hour INTEGER,
        period_min INTEGER,
        period_dweek INTEGER,
        period_dmon INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        deleted INTEGER NOT NULL DEFAULT 0,
        valid INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        UNIQUE (server_id, command, cron_user)
    );

    CREATE TABLE IF NOT EXISTS heartbeats (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        sent_at INTEGER NOT NULL,
        received_at INTEGER NOT NULL,
        sender TEXT NOT NULL,
        receiver TEXT NOT NULL,
        alert INTEGER NOT NULL DEFAULT 0,
        error TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_heartbeats_job_sent ON heartbeats(job_id, sent_at DESC);
";

const SERVER_COLUMNS: &str = "id, name, fqdn, customer_id, last_activity_at, created_at";
const JOB_COLUMNS: &str = "id, server_id, name, command, cron_user, period_group, period_hour, \
     period_min, period_dweek, period_dmon, active, deleted, valid, created_at";
const HEARTBEAT_COLUMNS: &str = "id, job_id, sent_at, received_at, sender, receiver, alert, error";

/// Record store persisted in a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Store opened: {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Turn a UNIQUE constraint failure into [`StorageError::Conflict`].
fn unique_conflict(err: rusqlite::Error, what: String) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StorageError::Conflict(what)
        }
        _ => StorageError::Sqlite(err),
    }
}

/// Timestamps are stored as milliseconds; returned records match what is read back.
fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    millis_to_timestamp(idx, millis)
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|millis| millis_to_timestamp(idx, millis))
        .transpose()
}

fn millis_to_timestamp(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: row.get(0)?,
        name: row.get(1)?,
        fqdn: row.get(2)?,
        customer_id: row.get(3)?,
        last_activity_at: optional_timestamp_at(row, 4)?,
        created_at: timestamp_at(row, 5)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let period_group = row
        .get::<_, Option<String>>(5)?
        .and_then(|group| match group.parse::<PeriodGroup>() {
            Ok(group) => Some(group),
            Err(e) => {
                tracing::debug!("Ignoring stored schedule: {e}");
                None
            }
        });
    Ok(Job {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        command: row.get(3)?,
        cron_user: row.get(4)?,
        schedule: Schedule {
            period_group,
            period_hour: row.get(6)?,
            period_min: row.get(7)?,
            period_dweek: row.get(8)?,
            period_dmon: row.get(9)?,
        },
        active: row.get::<_, i64>(10)? != 0,
        deleted: row.get::<_, i64>(11)? != 0,
        valid: row.get::<_, i64>(12)? != 0,
        created_at: timestamp_at(row, 13)?,
    })
}

fn heartbeat_from_row(row: &Row<'_>) -> rusqlite::Result<Heartbeat> {
    Ok(Heartbeat {
        id: row.get(0)?,
        job_id: row.get(1)?,
        sent_at: timestamp_at(row, 2)?,
        received_at: timestamp_at(row, 3)?,
        sender: row.get(4)?,
        receiver: row.get(5)?,
        alert: row.get::<_, i64>(6)? != 0,
        error: row.get(7)?,
    })
}

impl SqliteStore {
    fn query_jobs(&self, filter: &str, params: impl rusqlite::Params) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs {filter} ORDER BY created_at, id"
        ))?;
        let jobs = stmt
            .query_map(params, job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn query_server(&self, column: &str, value: &str) -> Result<Option<Server>> {
        let conn = self.lock()?;
        let server = conn
            .query_row(
                &format!(
                    "SELECT {SERVER_COLUMNS} FROM servers WHERE {column} = ?1
                     ORDER BY created_at, id LIMIT 1"
                ),
                rusqlite::params![value],
                server_from_row,
            )
            .optional()?;
        Ok(server)
    }
}

impl Store for SqliteStore {
    // ─── Servers ───────────────────────────────────

    fn create_customer(&self, name: &str) -> Result<Customer> {
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO customers (id, name) VALUES (?1, ?2)",
            rusqlite::params![customer.id, customer.name],
        )?;
        Ok(customer)
    }

    fn create_server(&self, server: &NewServer) -> Result<Server> {
        let created = Server {
            id: Uuid::new_v4().to_string(),
            name: server.name.clone(),
            fqdn: server.fqdn.clone(),
            customer_id: server.customer_id.clone(),
            last_activity_at: None,
            created_at: stored_precision(Utc::now()),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO servers (id, name, fqdn, customer_id, last_activity_at, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            rusqlite::params![
                created.id,
                created.name,
                created.fqdn,
                created.customer_id,
                created.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| unique_conflict(e, format!("server {}", server.name)))?;
        Ok(created)
    }

    fn find_server_by_name(&self, name: &str) -> Result<Option<Server>> {
        self.query_server("name", name)
    }

    fn find_server_by_fqdn(&self, fqdn: &str) -> Result<Option<Server>> {
        self.query_server("fqdn", fqdn)
    }

    fn list_servers(&self) -> Result<Vec<Server>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers ORDER BY name, created_at"
        ))?;
        let servers = stmt
            .query_map([], server_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(servers)
    }

    fn touch_server(&self, server_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE servers SET last_activity_at = ?1 WHERE id = ?2",
            rusqlite::params![at.timestamp_millis(), server_id],
        )?;
        Ok(count > 0)
    }

    fn delete_server(&self, server_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "DELETE FROM servers WHERE id = ?1",
            rusqlite::params![server_id],
        )?;
        Ok(count > 0)
    }

    // ─── Jobs ──────────────────────────────────────

    fn create_job(&self, job: &NewJob) -> Result<Job> {
        let created = Job {
            id: Uuid::new_v4().to_string(),
            server_id: job.server_id.clone(),
            name: job.name.clone(),
            command: job.command.clone(),
            cron_user: job.cron_user.clone(),
            schedule: job.schedule.clone(),
            active: job.active,
            deleted: false,
            valid: job.schedule.is_well_formed(),
            created_at: stored_precision(Utc::now()),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs (id, server_id, name, command, cron_user, period_group, period_hour,
                               period_min, period_dweek, period_dmon, active, deleted, valid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13)",
            rusqlite::params![
                created.id,
                created.server_id,
                created.name,
                created.command,
                created.cron_user,
                created.schedule.period_group.map(|g| g.as_str()),
                created.schedule.period_hour,
                created.schedule.period_min,
                created.schedule.period_dweek,
                created.schedule.period_dmon,
                created.active as i64,
                created.valid as i64,
                created.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| {
            unique_conflict(
                e,
                format!("job {} for {} on {}", job.command, job.cron_user, job.server_id),
            )
        })?;
        Ok(created)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                rusqlite::params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn find_job(&self, server_id: &str, command: &str, cron_user: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE server_id = ?1 AND command = ?2 AND cron_user = ?3"
                ),
                rusqlite::params![server_id, command, cron_user],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs("", [])
    }

    fn list_jobs_by_server(&self, server_id: &str) -> Result<Vec<Job>> {
        self.query_jobs("WHERE server_id = ?1", rusqlite::params![server_id])
    }

    fn list_jobs_by_period(&self, group: PeriodGroup) -> Result<Vec<Job>> {
        self.query_jobs("WHERE period_group = ?1", rusqlite::params![group.as_str()])
    }

    fn list_monitored_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs("WHERE active = 1 AND deleted = 0 AND valid = 1", [])
    }

    fn update_job_schedule(&self, job_id: &str, schedule: &Schedule) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE jobs SET period_group = ?1, period_hour = ?2, period_min = ?3,
                             period_dweek = ?4, period_dmon = ?5, valid = ?6
             WHERE id = ?7",
            rusqlite::params![
                schedule.period_group.map(|g| g.as_str()),
                schedule.period_hour,
                schedule.period_min,
                schedule.period_dweek,
                schedule.period_dmon,
                schedule.is_well_formed() as i64,
                job_id,
            ],
        )?;
        Ok(count > 0)
    }

    fn set_job_active(&self, job_id: &str, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE jobs SET active = ?1 WHERE id = ?2",
            rusqlite::params![active as i64, job_id],
        )?;
        Ok(count > 0)
    }

    fn soft_delete_job(&self, job_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE jobs SET deleted = 1 WHERE id = ?1",
            rusqlite::params![job_id],
        )?;
        Ok(count > 0)
    }

    // ─── Heartbeats ────────────────────────────────

    fn create_heartbeat(&self, heartbeat: &NewHeartbeat) -> Result<Heartbeat> {
        let created = Heartbeat {
            id: Uuid::new_v4().to_string(),
            job_id: heartbeat.job_id.clone(),
            sent_at: stored_precision(heartbeat.sent_at),
            received_at: stored_precision(heartbeat.received_at),
            sender: heartbeat.sender.clone(),
            receiver: heartbeat.receiver.clone(),
            alert: heartbeat.alert,
            error: heartbeat.error.clone(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO heartbeats (id, job_id, sent_at, received_at, sender, receiver, alert, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                created.id,
                created.job_id,
                created.sent_at.timestamp_millis(),
                created.received_at.timestamp_millis(),
                created.sender,
                created.receiver,
                created.alert as i64,
                created.error,
            ],
        )?;
        Ok(created)
    }

    fn latest_heartbeat(&self, job_id: &str) -> Result<Option<Heartbeat>> {
        let conn = self.lock()?;
        let heartbeat = conn
            .query_row(
                &format!(
                    "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE job_id = ?1
                     ORDER BY sent_at DESC, received_at DESC, rowid DESC LIMIT 1"
                ),
                rusqlite::params![job_id],
                heartbeat_from_row,
            )
            .optional()?;
        Ok(heartbeat)
    }

    fn list_heartbeats(&self, job_id: &str, query: &HeartbeatQuery) -> Result<Vec<Heartbeat>> {
        let since = query.since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats
             WHERE job_id = ?1 AND sent_at > ?2 AND (?3 = 0 OR alert = 1)
             ORDER BY sent_at DESC, received_at DESC, rowid DESC"
        ))?;
        let heartbeats = stmt
            .query_map(
                rusqlite::params![job_id, since, query.alerts_only as i64],
                heartbeat_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(heartbeats)
    }
}
