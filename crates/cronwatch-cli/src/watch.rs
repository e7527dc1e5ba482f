use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use cronwatch_config::MonitorConfig;
use cronwatch_monitor::{HeartbeatMonitor, MonitorRunner};
use cronwatch_storage::SqliteStore;

fn build_runner(store: Arc<SqliteStore>, config: &MonitorConfig) -> Result<MonitorRunner> {
    let monitor = HeartbeatMonitor::new(store.clone())
        .with_policy(config.alert_policy)
        .with_utc_offset(config.utc_offset()?);
    Ok(MonitorRunner::new(store, monitor))
}

/// One monitoring pass, report printed as JSON.
pub fn run_check(store: Arc<SqliteStore>, config: &MonitorConfig) -> Result<()> {
    let runner = build_runner(store, config)?;
    let report = runner.run_once(Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Monitor every `interval_secs` until Ctrl-C.
pub async fn run_watch(
    store: Arc<SqliteStore>,
    config: &MonitorConfig,
    interval_secs: u64,
) -> Result<()> {
    let runner = Arc::new(build_runner(store, config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(Duration::from_secs(interval_secs.max(1)), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down monitor");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
