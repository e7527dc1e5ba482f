//! Job resolution and auto-registration.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use tracing::{debug, info, warn};

use cronwatch_storage::{Result, StorageError, Store};
use cronwatch_types::{
    AUTO_DETECTED_PREFIX, Envelope, IngestOutcome, Job, NewHeartbeat, NewJob, Schedule, Server,
};

use crate::extract::extract_error;
use crate::parser::ParsedSubject;

/// Finds the job a notification belongs to, registering it when unknown,
/// and records the heartbeat.
pub struct JobResolver {
    store: Arc<dyn Store>,
    offset: FixedOffset,
}

impl JobResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            offset: Utc.fix(),
        }
    }

    /// Calendar offset used to read the hour and minute of auto-registered jobs.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Record `envelope` as a heartbeat of the job named by `parsed`.
    pub fn resolve_and_record(
        &self,
        parsed: &ParsedSubject,
        envelope: &Envelope,
        received_at: DateTime<Utc>,
    ) -> IngestOutcome {
        match self.try_resolve_and_record(parsed, envelope, received_at) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    server = %parsed.server_name,
                    command = %parsed.command,
                    cron_user = %parsed.cron_user,
                    "Failed to record heartbeat: {e}"
                );
                IngestOutcome::PersistenceError {
                    details: e.to_string(),
                }
            }
        }
    }

    fn try_resolve_and_record(
        &self,
        parsed: &ParsedSubject,
        envelope: &Envelope,
        received_at: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let Some(server) = self.find_server(&parsed.server_name)? else {
            debug!(server = %parsed.server_name, "Server not found");
            return Ok(IngestOutcome::ServerNotFound {
                server_name: parsed.server_name.clone(),
            });
        };

        let existing = self
            .store
            .find_job(&server.id, &parsed.command, &parsed.cron_user)?;
        let (job, new_job) = match existing {
            Some(job) => (job, false),
            None => self.register_job(&server, parsed, envelope)?,
        };

        let heartbeat = self.store.create_heartbeat(&NewHeartbeat::received(
            &job.id,
            envelope,
            received_at,
            extract_error(&envelope.body),
        ))?;
        info!(
            job_id = %job.id,
            server = %server.name,
            command = %job.command,
            has_error = !heartbeat.error.is_empty(),
            "Heartbeat recorded"
        );
        Ok(IngestOutcome::Recorded { heartbeat, new_job })
    }

    /// Exact name match first, then FQDN.
    fn find_server(&self, server_name: &str) -> Result<Option<Server>> {
        match self.store.find_server_by_name(server_name)? {
            Some(server) => Ok(Some(server)),
            None => self.store.find_server_by_fqdn(server_name),
        }
    }

    /// Create a daily job at the notification's time of day.
    ///
    /// Returns the job and whether this call created it. Losing a creation
    /// race to a concurrent ingest resolves to the job the winner created.
    fn register_job(
        &self,
        server: &Server,
        parsed: &ParsedSubject,
        envelope: &Envelope,
    ) -> Result<(Job, bool)> {
        let sent_local = envelope.sent_at.with_timezone(&self.offset);
        let new_job = NewJob {
            server_id: server.id.clone(),
            name: format!("{AUTO_DETECTED_PREFIX}{}", parsed.command),
            command: parsed.command.clone(),
            cron_user: parsed.cron_user.clone(),
            schedule: Schedule::daily(sent_local.hour(), sent_local.minute()),
            active: true,
        };

        match self.store.create_job(&new_job) {
            Ok(job) => {
                info!(
                    job_id = %job.id,
                    server = %server.name,
                    command = %job.command,
                    cron_user = %job.cron_user,
                    "Auto-registered job"
                );
                Ok((job, true))
            }
            Err(StorageError::Conflict(what)) => {
                debug!("Job registered concurrently ({what}), retrying lookup");
                let job = self
                    .store
                    .find_job(&server.id, &parsed.command, &parsed.cron_user)?
                    .ok_or(StorageError::Conflict(what))?;
                Ok((job, false))
            }
            Err(e) => Err(e),
        }
    }
}
