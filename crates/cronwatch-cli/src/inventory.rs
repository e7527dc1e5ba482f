//! Operator commands for customers, servers, jobs and heartbeat history.

use anyhow::{Result, bail};
use chrono::{Duration, Utc};

use cronwatch_storage::{HeartbeatQuery, Store};
use cronwatch_types::{Job, NewServer, PeriodGroup, Schedule, ServerStatus};

pub fn add_customer(store: &dyn Store, name: &str) -> Result<()> {
    let customer = store.create_customer(name)?;
    println!("{}", customer.id);
    Ok(())
}

pub fn add_server(
    store: &dyn Store,
    name: String,
    fqdn: Option<String>,
    customer_id: Option<String>,
) -> Result<()> {
    let server = store.create_server(&NewServer {
        name,
        fqdn,
        customer_id,
    })?;
    println!("{}", server.id);
    Ok(())
}

pub fn list_servers(store: &dyn Store) -> Result<()> {
    let now = Utc::now();
    for server in store.list_servers()? {
        let status = match server.status(now) {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
        };
        println!(
            "{}  {}  {}  {}",
            server.id,
            server.name,
            server.fqdn.as_deref().unwrap_or("-"),
            status
        );
    }
    Ok(())
}

pub fn touch_server(store: &dyn Store, id: &str) -> Result<()> {
    if !store.touch_server(id, Utc::now())? {
        bail!("No server with ID {id}");
    }
    Ok(())
}

pub fn remove_server(store: &dyn Store, id: &str) -> Result<()> {
    if !store.delete_server(id)? {
        bail!("No server with ID {id}");
    }
    Ok(())
}

/// Which jobs `job list` shows.
#[derive(Debug, Default)]
pub struct JobFilter {
    pub server: Option<String>,
    pub period: Option<PeriodGroup>,
    pub monitored: bool,
}

pub fn list_jobs(store: &dyn Store, filter: &JobFilter) -> Result<()> {
    for line in job_lines(store, filter)? {
        println!("{line}");
    }
    Ok(())
}

fn job_lines(store: &dyn Store, filter: &JobFilter) -> Result<Vec<String>> {
    let mut jobs = match (&filter.server, filter.period) {
        (Some(name), _) => {
            let Some(server) = store.find_server_by_name(name)? else {
                bail!("No server named {name}");
            };
            store.list_jobs_by_server(&server.id)?
        }
        (None, Some(group)) => store.list_jobs_by_period(group)?,
        (None, None) if filter.monitored => store.list_monitored_jobs()?,
        (None, None) => store.list_jobs()?,
    };
    jobs.retain(|job| {
        filter
            .period
            .is_none_or(|group| job.schedule.period_group == Some(group))
            && (!filter.monitored || job.is_monitored())
    });
    Ok(jobs.iter().map(job_line).collect())
}

fn job_line(job: &Job) -> String {
    let state = if job.deleted {
        "deleted"
    } else if !job.valid {
        "invalid"
    } else if !job.active {
        "paused"
    } else {
        "monitored"
    };
    let origin = if job.is_auto_detected() { ", auto" } else { "" };
    format!(
        "{}  {}@{}  {}  [{state}{origin}] {}",
        job.id,
        job.cron_user,
        job.server_id,
        describe_schedule(&job.schedule),
        job.name
    )
}

fn describe_schedule(schedule: &Schedule) -> String {
    let time = match (schedule.period_hour, schedule.period_min) {
        (Some(h), Some(m)) => format!("{h:02}:{m:02}"),
        _ => "--:--".to_string(),
    };
    match schedule.period_group {
        Some(PeriodGroup::Daily) => format!("daily {time}"),
        Some(PeriodGroup::Weekly) => match schedule.period_dweek {
            Some(d) => format!("weekly +{d}d {time}"),
            None => format!("weekly ? {time}"),
        },
        Some(PeriodGroup::Monthly) => match schedule.period_dmon {
            Some(d) => format!("monthly day {d} {time}"),
            None => format!("monthly ? {time}"),
        },
        None => "unscheduled".to_string(),
    }
}

pub fn set_schedule(store: &dyn Store, id: &str, schedule: &Schedule) -> Result<()> {
    if !store.update_job_schedule(id, schedule)? {
        bail!("No job with ID {id}");
    }
    if !schedule.is_well_formed() {
        tracing::warn!(job_id = %id, "Schedule is incomplete, job will not be monitored");
    }
    Ok(())
}

pub fn set_active(store: &dyn Store, id: &str, active: bool) -> Result<()> {
    if !store.set_job_active(id, active)? {
        bail!("No job with ID {id}");
    }
    Ok(())
}

pub fn delete_job(store: &dyn Store, id: &str) -> Result<()> {
    if !store.soft_delete_job(id)? {
        bail!("No job with ID {id}");
    }
    Ok(())
}

/// Heartbeat summaries of a job over the last `days` days, newest first.
pub fn history_lines(
    store: &dyn Store,
    job_id: &str,
    days: i64,
    alerts_only: bool,
) -> Result<Vec<String>> {
    let since = Duration::try_days(days).and_then(|window| Utc::now().checked_sub_signed(window));
    let Some(since) = since else {
        bail!("--days {days} is out of range");
    };
    if store.get_job(job_id)?.is_none() {
        bail!("No job with ID {job_id}");
    }
    let query = HeartbeatQuery {
        since: Some(since),
        alerts_only,
    };
    Ok(store
        .list_heartbeats(job_id, &query)?
        .iter()
        .map(|heartbeat| heartbeat.summary())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronwatch_storage::SqliteStore;
    use cronwatch_types::{NewHeartbeat, NewJob};

    fn seeded() -> (SqliteStore, Job, Job) {
        let store = SqliteStore::open_in_memory().unwrap();
        let server = store
            .create_server(&NewServer {
                name: "server1".into(),
                ..Default::default()
            })
            .unwrap();
        let new_job = |command: &str, schedule: Schedule| {
            store
                .create_job(&NewJob {
                    server_id: server.id.clone(),
                    name: command.into(),
                    command: command.into(),
                    cron_user: "root".into(),
                    schedule,
                    active: true,
                })
                .unwrap()
        };
        let daily = new_job("/daily.sh", Schedule::daily(2, 5));
        let weekly = new_job("/weekly.sh", Schedule::weekly(6, 23, 0));
        (store, daily, weekly)
    }

    #[test]
    fn test_describe_schedule() {
        assert_eq!(describe_schedule(&Schedule::daily(2, 5)), "daily 02:05");
        assert_eq!(describe_schedule(&Schedule::weekly(6, 23, 0)), "weekly +6d 23:00");
        assert_eq!(describe_schedule(&Schedule::monthly(1, 0, 0)), "monthly day 1 00:00");
        assert_eq!(describe_schedule(&Schedule::default()), "unscheduled");
    }

    #[test]
    fn test_job_lines_filters() {
        let (store, daily, weekly) = seeded();

        let all = job_lines(&store, &JobFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let weekly_only = job_lines(
            &store,
            &JobFilter {
                period: Some(PeriodGroup::Weekly),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(weekly_only.len(), 1);
        assert!(weekly_only[0].starts_with(&weekly.id));

        set_active(&store, &weekly.id, false).unwrap();
        let monitored = job_lines(
            &store,
            &JobFilter {
                server: Some("server1".into()),
                monitored: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(monitored.len(), 1);
        assert!(monitored[0].starts_with(&daily.id));
        assert!(monitored[0].ends_with("[monitored] /daily.sh"));

        assert!(job_lines(
            &store,
            &JobFilter {
                server: Some("ghost".into()),
                ..Default::default()
            }
        )
        .is_err());
    }

    #[test]
    fn test_job_line_marks_auto_detected() {
        let (store, daily, _) = seeded();
        assert!(job_line(&daily).ends_with("[monitored] /daily.sh"));

        let server_id = daily.server_id.clone();
        let auto = store
            .create_job(&NewJob {
                server_id,
                name: format!("{}/sync.sh", cronwatch_types::AUTO_DETECTED_PREFIX),
                command: "/sync.sh".into(),
                cron_user: "www".into(),
                schedule: Schedule::daily(4, 0),
                active: true,
            })
            .unwrap();
        assert!(job_line(&auto).ends_with("[monitored, auto] Auto detected: /sync.sh"));
    }

    #[test]
    fn test_set_schedule_and_delete() {
        let (store, daily, _) = seeded();
        set_schedule(&store, &daily.id, &Schedule::monthly(3, 4, 5)).unwrap();
        let job = store.get_job(&daily.id).unwrap().unwrap();
        assert_eq!(job.schedule, Schedule::monthly(3, 4, 5));

        delete_job(&store, &daily.id).unwrap();
        assert!(store.get_job(&daily.id).unwrap().unwrap().deleted);
        assert!(delete_job(&store, "missing").is_err());
    }

    #[test]
    fn test_history_lines() {
        let (store, daily, _) = seeded();
        let now = Utc::now();
        store
            .create_heartbeat(&NewHeartbeat::missed_execution(&daily.id, now))
            .unwrap();
        store
            .create_heartbeat(&NewHeartbeat {
                job_id: daily.id.clone(),
                sent_at: now - Duration::days(1),
                received_at: now - Duration::days(1),
                sender: "root@server1".into(),
                receiver: "cron@monitor".into(),
                alert: false,
                error: String::new(),
            })
            .unwrap();
        store
            .create_heartbeat(&NewHeartbeat::missed_execution(
                &daily.id,
                now - Duration::days(30),
            ))
            .unwrap();

        let lines = history_lines(&store, &daily.id, 7, false).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "ALERT: Expected cron execution message not received");
        assert!(lines[1].starts_with("OK: root@server1 -> cron@monitor at "));

        let alerts = history_lines(&store, &daily.id, 7, true).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(history_lines(&store, "missing", 7, false).is_err());

        let err = history_lines(&store, &daily.id, i64::MAX, false).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(history_lines(&store, &daily.id, -i64::MAX, false).is_err());
    }
}
