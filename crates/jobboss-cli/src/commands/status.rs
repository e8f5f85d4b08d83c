//! Status command implementation.
//!
//! Show one or more jobs, or list jobs by state and batch.

use anyhow::{Context, Result};
use console::style;

use jobboss_sched::{JobFilter, JobId, JobState};

use super::common::{open_client, print_job, print_json, styled_state};
use crate::config::Settings;

/// Execute the status command.
pub async fn execute(
    settings: &Settings,
    job_ids: &[i64],
    batch: Option<&str>,
    state: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<()> {
    let client = open_client(&settings.database)?;

    if !job_ids.is_empty() {
        let ids: Vec<JobId> = job_ids.iter().copied().map(JobId).collect();
        let jobs = client.jobs(&ids).await.context("Failed to load jobs")?;

        if format == "json" {
            return print_json(&jobs);
        }
        for job in &jobs {
            print_job(job);
        }
        return Ok(());
    }

    let mut filter = match state {
        Some(state) => JobFilter::in_states([parse_state(state)?]),
        None => JobFilter::default(),
    };
    if let Some(batch) = batch {
        filter = filter.with_batch(batch);
    }
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }

    let jobs = client
        .list_jobs(&filter)
        .await
        .context("Failed to list jobs")?;

    if format == "json" {
        return print_json(&jobs);
    }

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());

    println!(
        "  {:<8}  {:<28}  {:<10}  {:<10}  {}",
        style("JOB ID").bold(),
        style("PATH").bold(),
        style("STATUS").bold(),
        style("PRIORITY").bold(),
        style("CREATED").bold()
    );
    println!("  {}", "-".repeat(80));

    for job in &jobs {
        println!(
            "  {:<8}  {:<28}  {:<10}  {:<10}  {}",
            style(job.id).dim(),
            job.path,
            styled_state(job.state()),
            job.priority.value(),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

fn parse_state(name: &str) -> Result<JobState> {
    match name.to_lowercase().as_str() {
        "pending" => Ok(JobState::Pending),
        "running" => Ok(JobState::Running),
        "succeeded" | "success" => Ok(JobState::Succeeded),
        "failed" | "error" => Ok(JobState::Failed),
        "mia" => Ok(JobState::Mia),
        "cancelled" => Ok(JobState::Cancelled),
        other => anyhow::bail!(
            "Unknown state: '{other}'. Available: pending, running, succeeded, failed, mia, cancelled"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("MIA").unwrap(), JobState::Mia);
        assert_eq!(parse_state("error").unwrap(), JobState::Failed);
        assert!(parse_state("zombie").is_err());
    }
}
