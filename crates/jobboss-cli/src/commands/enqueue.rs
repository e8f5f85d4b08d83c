//! Enqueue command implementation.

use anyhow::{Context, Result};
use console::style;

use jobboss_sched::{NewJob, Priority};

use super::common::{open_client, parse_arg, print_json};
use crate::config::Settings;
use crate::jobs;

/// Execute the enqueue command.
pub async fn execute(
    settings: &Settings,
    path: &str,
    args: &[String],
    batch: Option<&str>,
    priority: u32,
    format: &str,
) -> Result<()> {
    let client = open_client(&settings.database)?;

    let mut new_job = NewJob::new(path, args.iter().map(|a| parse_arg(a)).collect())
        .with_priority(Priority::new(priority));
    if let Some(batch) = batch {
        new_job = new_job.in_batch(batch);
    }

    let job = client
        .enqueue_checked(&jobs::registry(), new_job)
        .await
        .with_context(|| format!("Failed to enqueue {path}"))?;

    match format {
        "json" => print_json(&job)?,
        _ => println!(
            "{} Enqueued job {} ({})",
            style("✓").green().bold(),
            style(job.id).bold(),
            style(&job.path).dim()
        ),
    }

    Ok(())
}
