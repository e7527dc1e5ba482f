//! Ingestion entry point.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::debug;

use cronwatch_storage::Store;
use cronwatch_types::{Envelope, IngestOutcome};

use crate::parser::parse_subject;
use crate::resolver::JobResolver;

/// Parses an envelope's subject and hands it to the [`JobResolver`].
pub struct IngestPipeline {
    resolver: JobResolver,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            resolver: JobResolver::new(store),
        }
    }

    pub fn with_utc_offset(self, offset: FixedOffset) -> Self {
        Self {
            resolver: self.resolver.with_utc_offset(offset),
        }
    }

    /// Ingest one notification, stamping it as received now.
    pub fn ingest(&self, envelope: &Envelope) -> IngestOutcome {
        self.ingest_at(envelope, Utc::now())
    }

    pub fn ingest_at(&self, envelope: &Envelope, received_at: DateTime<Utc>) -> IngestOutcome {
        let Some(parsed) = parse_subject(&envelope.subject) else {
            debug!(subject = %envelope.subject, from = %envelope.from, "Not a cron notification");
            return IngestOutcome::InvalidFormat;
        };
        self.resolver.resolve_and_record(&parsed, envelope, received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    use chrono::TimeZone;
    use cronwatch_storage::{HeartbeatQuery, SqliteStore};
    use cronwatch_types::{NewServer, PeriodGroup};

    use crate::resolver::test_support::FlakyStore;

    fn utc(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, mi, 0).unwrap()
    }

    fn envelope(subject: &str, sent_at: DateTime<Utc>) -> Envelope {
        Envelope {
            from: "root@server1".into(),
            to: "cron@monitor".into(),
            subject: subject.into(),
            body: "rsync: sent 12 files\nbackup done".into(),
            sent_at,
        }
    }

    fn store_with_server() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .create_server(&NewServer {
                name: "server1".into(),
                ..Default::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn test_invalid_subject() {
        let store = store_with_server();
        let pipeline = IngestPipeline::new(store.clone());

        let outcome = pipeline.ingest_at(&envelope("backup finished", utc(8, 3, 0)), utc(8, 3, 1));
        assert_eq!(outcome, IngestOutcome::InvalidFormat);
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_second_ingest_reuses_auto_registered_job() {
        let store = store_with_server();
        let pipeline = IngestPipeline::new(store.clone());
        let subject = "[Cron <root@server1>: /backup.sh]";

        let first = pipeline.ingest_at(&envelope(subject, utc(8, 3, 0)), utc(8, 3, 1));
        let IngestOutcome::Recorded { heartbeat, new_job } = first else {
            panic!("expected recorded, got {first:?}");
        };
        assert!(new_job);
        assert_eq!(heartbeat.error, "");
        let job_id = heartbeat.job_id;

        let second = pipeline.ingest_at(&envelope(subject, utc(9, 3, 2)), utc(9, 3, 3));
        let IngestOutcome::Recorded { heartbeat, new_job } = second else {
            panic!("expected recorded, got {second:?}");
        };
        assert!(!new_job);
        assert_eq!(heartbeat.job_id, job_id);

        let jobs = store.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].schedule.period_group, Some(PeriodGroup::Daily));
        assert_eq!(jobs[0].schedule.period_hour, Some(3));
        assert_eq!(jobs[0].schedule.period_min, Some(0));
        let beats = store
            .list_heartbeats(&job_id, &HeartbeatQuery::default())
            .unwrap();
        assert_eq!(beats.len(), 2);
    }

    #[test]
    fn test_unknown_server() {
        let store = store_with_server();
        let pipeline = IngestPipeline::new(store.clone());

        let outcome = pipeline.ingest_at(
            &envelope("[Cron <root@nowhere>: /backup.sh]", utc(8, 3, 0)),
            utc(8, 3, 1),
        );
        assert_eq!(
            outcome,
            IngestOutcome::ServerNotFound {
                server_name: "nowhere".into()
            }
        );
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_ingest_creates_one_job() {
        let store = store_with_server();
        let pipeline = IngestPipeline::new(store.clone());
        let barrier = Barrier::new(4);

        let outcomes: Vec<IngestOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let pipeline = &pipeline;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        pipeline.ingest_at(
                            &envelope("[Cron <root@server1>: /race.sh]", utc(8, 4, i)),
                            utc(8, 5, 0),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut created = 0;
        for outcome in &outcomes {
            match outcome {
                IngestOutcome::Recorded { new_job, .. } => created += usize::from(*new_job),
                other => panic!("expected recorded, got {other:?}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_error_surfaces() {
        let store = Arc::new(FlakyStore::new());
        store
            .create_server(&NewServer {
                name: "server1".into(),
                ..Default::default()
            })
            .unwrap();
        store
            .fail_heartbeats
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let pipeline = IngestPipeline::new(store.clone());

        let outcome = pipeline.ingest_at(
            &envelope("[Cron <root@server1>: /backup.sh]", utc(8, 3, 0)),
            utc(8, 3, 1),
        );
        assert!(matches!(outcome, IngestOutcome::PersistenceError { .. }));
    }
}
