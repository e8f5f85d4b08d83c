//! Wait command implementation.
//!
//! Poll jobs until every one is terminal, showing percent complete, then
//! print each job.

use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use jobboss_sched::{JobId, JobState, WaitOptions};

use super::common::{open_client, print_job, select_ids};
use crate::config::Settings;

/// Execute the wait command.
pub async fn execute(
    settings: &Settings,
    job_ids: &[i64],
    batch: Option<&str>,
    timeout: Option<u64>,
) -> Result<()> {
    let client = open_client(&settings.database)?;
    let ids = select_ids(&client, job_ids, batch).await?;

    println!(
        "{} Waiting for {} job(s){}",
        style("→").cyan().bold(),
        ids.len(),
        timeout.map(|t| format!(" (timeout: {t}s)")).unwrap_or_default()
    );

    let mut options = WaitOptions::default()
        .with_poll_interval(Duration::from_millis(settings.poll_interval_ms));
    if let Some(secs) = timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {elapsed_precise}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let waited = client
        .wait_for_jobs(&ids, &options, |percent| bar.set_position(percent.floor() as u64))
        .await;
    bar.finish_and_clear();

    let jobs = waited.with_context(|| {
        format!("Use 'jobboss status {}' to check later", join_ids(&ids))
    })?;

    for job in &jobs {
        print_job(job);
    }

    let unsuccessful = jobs
        .iter()
        .filter(|job| job.state() != JobState::Succeeded)
        .count();
    if unsuccessful > 0 {
        println!(
            "\n{} {} of {} job(s) did not succeed",
            style("✗").red().bold(),
            unsuccessful,
            jobs.len()
        );
    } else if let Some(taken) = client.time_taken(&ids).await? {
        println!(
            "\n{} All jobs succeeded in {:.3}s",
            style("✓").green().bold(),
            taken.num_milliseconds() as f64 / 1000.0
        );
    }

    Ok(())
}

fn join_ids(ids: &[JobId]) -> String {
    ids.iter().map(JobId::to_string).collect::<Vec<_>>().join(" ")
}
