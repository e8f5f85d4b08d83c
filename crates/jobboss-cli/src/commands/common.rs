//! Shared helpers for CLI commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::{StyledObject, style};
use serde_json::Value;

use jobboss_sched::{Client, Job, JobFilter, JobId, JobState, SqliteStore};

/// Open (creating if needed) the SQLite job store at `path`.
pub fn open_store(path: &Path) -> Result<Arc<SqliteStore>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let store = SqliteStore::new(path)
        .with_context(|| format!("Failed to open job store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// A client over the job store at `path`.
pub fn open_client(path: &Path) -> Result<Client> {
    Ok(Client::new(open_store(path)?))
}

/// Parse a positional job argument: JSON if it parses, a plain string otherwise.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Ids named on the command line, plus every member of `batch`.
pub async fn select_ids(client: &Client, ids: &[i64], batch: Option<&str>) -> Result<Vec<JobId>> {
    let mut selected: Vec<JobId> = ids.iter().copied().map(JobId).collect();

    if let Some(batch) = batch {
        let members = client
            .list_jobs(&JobFilter::for_batch(batch))
            .await
            .with_context(|| format!("Failed to list batch {batch}"))?;
        if members.is_empty() {
            anyhow::bail!("Batch {batch} has no jobs");
        }
        selected.extend(members.into_iter().map(|job| job.id));
    }

    if selected.is_empty() {
        anyhow::bail!("Please provide job IDs or --batch");
    }

    selected.sort();
    selected.dedup();
    Ok(selected)
}

/// Color a state name for terminal output.
pub fn styled_state(state: JobState) -> StyledObject<&'static str> {
    let name = state.name();
    match state {
        JobState::Succeeded => style(name).green(),
        JobState::Failed | JobState::Mia => style(name).red(),
        JobState::Cancelled => style(name).magenta(),
        JobState::Pending => style(name).yellow(),
        JobState::Running => style(name).cyan(),
    }
}

/// Print one job in the detail format shared by status, result and wait.
pub fn print_job(job: &Job) {
    println!(
        "{} Job {} {}: {}",
        style("→").cyan().bold(),
        style(job.id).bold(),
        style(&job.path).dim(),
        styled_state(job.state()).bold()
    );

    let args: Vec<String> = job.args.iter().map(Value::to_string).collect();
    println!("  Args:     [{}]", args.join(", "));

    if let Some(batch_id) = &job.batch_id {
        println!("  Batch:    {}", style(batch_id).dim());
    }

    if let (Some(host), Some(pid)) = (&job.employee_host, job.employee_pid) {
        println!("  Employee: {host}:{pid}");
    }

    if let Some(result) = &job.result {
        println!("  Result:   {}", style(result).green());
    }

    if let Some(error) = job.error() {
        println!(
            "  Error:    {} {}",
            style(&error.class).red().bold(),
            error.message
        );
        for frame in &error.backtrace {
            println!("            {}", style(frame).dim());
        }
    }

    if let Some(taken) = job.time_taken() {
        println!(
            "  Took:     {:.3}s",
            taken.num_milliseconds() as f64 / 1000.0
        );
    }
}

/// Print a JSON document to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
    println!("{json}");
    Ok(())
}
