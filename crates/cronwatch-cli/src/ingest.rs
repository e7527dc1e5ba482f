use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use cronwatch_config::MonitorConfig;
use cronwatch_ingest::IngestPipeline;
use cronwatch_storage::SqliteStore;
use cronwatch_types::{Envelope, IngestOutcome};

/// Exit status asking a delivering MTA to retry later (sysexits EX_TEMPFAIL).
const EX_TEMPFAIL: u8 = 75;

/// Ingest one envelope and print the outcome as JSON.
pub fn run_ingest(
    store: Arc<SqliteStore>,
    monitor: &MonitorConfig,
    file: Option<&Path>,
) -> Result<ExitCode> {
    let envelope = read_envelope(file)?;
    let pipeline = IngestPipeline::new(store).with_utc_offset(monitor.utc_offset()?);
    let outcome = pipeline.ingest(&envelope);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(ExitCode::from(exit_status(&outcome)))
}

fn exit_status(outcome: &IngestOutcome) -> u8 {
    match outcome {
        IngestOutcome::PersistenceError { .. } => EX_TEMPFAIL,
        _ => 0,
    }
}

/// Read a JSON envelope from `file`, or stdin when `None`.
pub fn read_envelope(file: Option<&Path>) -> Result<Envelope> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw)
        .context("Envelope must be JSON with from, to, subject, body and sent_at")
}
