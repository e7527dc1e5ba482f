mod ingest;
mod inventory;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cronwatch_config::CronwatchConfig;
use cronwatch_storage::SqliteStore;
use cronwatch_types::PeriodGroup;

#[derive(Parser)]
#[command(name = "cronwatch", about = "Cron job heartbeat monitor")]
struct Cli {
    /// Config file (defaults to ~/.cronwatch/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a cron notification envelope read as JSON
    Ingest {
        /// Envelope file (reads stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Run one monitoring pass over all monitored jobs
    Check,
    /// Monitor continuously until interrupted
    Watch {
        /// Seconds between passes (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Manage customers
    Customer {
        #[command(subcommand)]
        action: CustomerAction,
    },
    /// Manage servers
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Show heartbeats of a job, newest first
    History {
        /// Job ID
        #[arg(long)]
        job: String,

        /// How many days back to show
        #[arg(long, default_value_t = 7)]
        days: i64,

        /// Only show alerts
        #[arg(long)]
        alerts: bool,
    },
    /// Check system health
    Health,
}

#[derive(Subcommand)]
enum CustomerAction {
    /// Register a customer and print its ID
    Add { name: String },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Provision a server
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        fqdn: Option<String>,

        /// Owning customer ID
        #[arg(long)]
        customer_id: Option<String>,
    },
    /// List servers
    List,
    /// Mark a server as seen now
    Touch { id: String },
    /// Delete a server with its jobs and heartbeats
    Remove { id: String },
}

#[derive(Subcommand)]
enum JobAction {
    /// List jobs
    List {
        /// Only jobs of this server (name)
        #[arg(long)]
        server: Option<String>,

        /// Only jobs with this period group
        #[arg(long)]
        period: Option<PeriodGroup>,

        /// Only jobs that are currently monitored
        #[arg(long)]
        monitored: bool,
    },
    /// Set a job's schedule
    Schedule {
        id: String,

        #[arg(long)]
        period: PeriodGroup,

        #[arg(long)]
        hour: u32,

        #[arg(long)]
        min: u32,

        /// Days after Monday (weekly)
        #[arg(long)]
        dweek: Option<u32>,

        /// Day of month (monthly)
        #[arg(long)]
        dmon: Option<u32>,
    },
    /// Stop monitoring a job
    Pause { id: String },
    /// Resume monitoring a job
    Resume { id: String },
    /// Soft-delete a job
    Delete { id: String },
}

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => cronwatch_config::load_config_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => cronwatch_config::load_config().unwrap_or_default(),
    };

    match cli.command {
        Commands::Ingest { file } => {
            let store = open_store(&config, cli.db)?;
            return ingest::run_ingest(store, &config.monitor, file.as_deref());
        }
        Commands::Check => {
            let store = open_store(&config, cli.db)?;
            watch::run_check(store, &config.monitor)?;
        }
        Commands::Watch { interval } => {
            let store = open_store(&config, cli.db)?;
            let every = interval.unwrap_or(config.monitor.interval_secs);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(watch::run_watch(store, &config.monitor, every))?;
        }
        Commands::Customer { action } => {
            let store = open_store(&config, cli.db)?;
            match action {
                CustomerAction::Add { name } => inventory::add_customer(store.as_ref(), &name)?,
            }
        }
        Commands::Server { action } => {
            let store = open_store(&config, cli.db)?;
            match action {
                ServerAction::Add {
                    name,
                    fqdn,
                    customer_id,
                } => inventory::add_server(store.as_ref(), name, fqdn, customer_id)?,
                ServerAction::List => inventory::list_servers(store.as_ref())?,
                ServerAction::Touch { id } => inventory::touch_server(store.as_ref(), &id)?,
                ServerAction::Remove { id } => inventory::remove_server(store.as_ref(), &id)?,
            }
        }
        Commands::Job { action } => {
            let store = open_store(&config, cli.db)?;
            match action {
                JobAction::List {
                    server,
                    period,
                    monitored,
                } => {
                    let filter = inventory::JobFilter {
                        server,
                        period,
                        monitored,
                    };
                    inventory::list_jobs(store.as_ref(), &filter)?
                }
                JobAction::Schedule {
                    id,
                    period,
                    hour,
                    min,
                    dweek,
                    dmon,
                } => {
                    let schedule = cronwatch_types::Schedule {
                        period_group: Some(period),
                        period_hour: Some(hour),
                        period_min: Some(min),
                        period_dweek: dweek,
                        period_dmon: dmon,
                    };
                    inventory::set_schedule(store.as_ref(), &id, &schedule)?
                }
                JobAction::Pause { id } => inventory::set_active(store.as_ref(), &id, false)?,
                JobAction::Resume { id } => inventory::set_active(store.as_ref(), &id, true)?,
                JobAction::Delete { id } => inventory::delete_job(store.as_ref(), &id)?,
            }
        }
        Commands::History { job, days, alerts } => {
            let store = open_store(&config, cli.db)?;
            for line in inventory::history_lines(store.as_ref(), &job, days, alerts)? {
                println!("{line}");
            }
        }
        Commands::Health => {
            println!("cronwatch is healthy");
            println!("  database: {}", config.database_path()?.display());
            println!("  check interval: {}s", config.monitor.interval_secs);
            println!("  alert policy: {:?}", config.monitor.alert_policy);
            println!("  utc offset: {}", config.monitor.utc_offset()?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Open the configured database, creating its directory if needed.
fn open_store(config: &CronwatchConfig, db: Option<PathBuf>) -> anyhow::Result<Arc<SqliteStore>> {
    let path = match db {
        Some(path) => path,
        None => config.database_path()?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}
