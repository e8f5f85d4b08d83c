//! Job Boss Command-Line Interface
//!
//! `jobboss start` runs the boss in the foreground; it re-invokes this binary
//! as `jobboss employee --job <id>` for every job it dispatches. The other
//! subcommands are clients of the same SQLite database.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

mod commands;
mod config;
mod jobs;
mod tracing_config;

use commands::{
    cancel, employee, enqueue, purge, redo, resources, result, start, status, wait,
};
use config::Settings;
use tracing_config::{TracingConfig, init_tracing};

/// Job Boss - persistent job queue with process-isolated employees
#[derive(Parser)]
#[command(name = "jobboss")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "JOBBOSS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite job database (overrides the configuration)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the boss in the foreground until interrupted
    Start {
        /// Maximum number of concurrently running employees
        #[arg(short, long)]
        employee_limit: Option<usize>,

        /// Poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Delete finished jobs older than this many seconds
        #[arg(long)]
        retention_secs: Option<u64>,
    },

    /// Execute one claimed job (spawned by the boss)
    #[command(hide = true)]
    Employee {
        /// Job to execute
        #[arg(long)]
        job: i64,
    },

    /// Enqueue a job
    Enqueue {
        /// Job path, "<resource>#<action>"
        path: String,

        /// Positional arguments (parsed as JSON, falling back to strings)
        args: Vec<String>,

        /// Batch to enqueue under
        #[arg(short, long)]
        batch: Option<String>,

        /// Priority (weight in the fair dequeue, at least 1)
        #[arg(short, long, default_value = "1")]
        priority: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show job status
    Status {
        /// Job IDs (lists jobs if omitted)
        job_ids: Vec<i64>,

        /// Only jobs in this batch
        #[arg(short, long)]
        batch: Option<String>,

        /// Only jobs in this state (pending, running, succeeded, failed, mia, cancelled)
        #[arg(short, long)]
        state: Option<String>,

        /// Maximum number of jobs to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel jobs
    Cancel {
        /// Job IDs
        job_ids: Vec<i64>,

        /// Cancel every job in this batch
        #[arg(short, long)]
        batch: Option<String>,
    },

    /// Put jobs back to pending
    Redo {
        /// Job IDs
        job_ids: Vec<i64>,

        /// Redo every job in this batch
        #[arg(short, long)]
        batch: Option<String>,
    },

    /// Wait for jobs to finish
    Wait {
        /// Job IDs
        job_ids: Vec<i64>,

        /// Wait for every job in this batch
        #[arg(short, long)]
        batch: Option<String>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show results by arguments
    Result {
        /// Job IDs
        job_ids: Vec<i64>,

        /// Every job in this batch
        #[arg(short, long)]
        batch: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete completed jobs older than the given age
    Purge {
        /// Age in seconds
        #[arg(long)]
        older_than_secs: u64,
    },

    /// List available job paths
    Resources,
}

/// Resolve settings: file, then environment, then flags.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;

    if let Some(database) = &cli.database {
        settings.database = database.clone();
    }

    if let Commands::Start {
        employee_limit,
        poll_interval_ms,
        retention_secs,
    } = &cli.command
    {
        if let Some(limit) = employee_limit {
            settings.employee_limit = *limit;
        }
        if let Some(ms) = poll_interval_ms {
            settings.poll_interval_ms = *ms;
        }
        if retention_secs.is_some() {
            settings.retention_secs = *retention_secs;
        }
    }

    settings.validate()?;
    Ok(settings)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    init_tracing(&TracingConfig::from_settings(&settings.logging, cli.verbose))?;

    match cli.command {
        Commands::Start { .. } => {
            start::execute(&settings, cli.config.as_deref(), cli.verbose).await
        }

        Commands::Employee { job } => employee::execute(&settings, job).await,

        Commands::Enqueue {
            path,
            args,
            batch,
            priority,
            format,
        } => enqueue::execute(&settings, &path, &args, batch.as_deref(), priority, &format).await,

        Commands::Status {
            job_ids,
            batch,
            state,
            limit,
            format,
        } => {
            status::execute(
                &settings,
                &job_ids,
                batch.as_deref(),
                state.as_deref(),
                limit,
                &format,
            )
            .await
        }

        Commands::Cancel { job_ids, batch } => {
            cancel::execute(&settings, &job_ids, batch.as_deref()).await
        }

        Commands::Redo { job_ids, batch } => {
            redo::execute(&settings, &job_ids, batch.as_deref()).await
        }

        Commands::Wait {
            job_ids,
            batch,
            timeout,
        } => wait::execute(&settings, &job_ids, batch.as_deref(), timeout).await,

        Commands::Result {
            job_ids,
            batch,
            format,
        } => result::execute(&settings, &job_ids, batch.as_deref(), &format).await,

        Commands::Purge { older_than_secs } => purge::execute(&settings, older_than_secs).await,

        Commands::Resources => {
            resources::execute();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle errors
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
