//! cronwatch-monitor: missed-execution detection.
//!
//! Computes when each job should last have run, compares that against the
//! most recent heartbeat and writes an alert heartbeat when the job is late.

pub mod monitor;
pub mod runner;
pub mod schedule;

pub use monitor::HeartbeatMonitor;
pub use runner::{MonitorRunner, TickReport};
pub use schedule::{expected_occurrence, grace_period, period_start};
