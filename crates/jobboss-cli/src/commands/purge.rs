//! Purge command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;

use super::common::open_client;
use crate::config::Settings;

/// Execute the purge command: delete jobs completed more than `older_than_secs` ago.
pub async fn execute(settings: &Settings, older_than_secs: u64) -> Result<()> {
    let client = open_client(&settings.database)?;

    let age = chrono::Duration::from_std(Duration::from_secs(older_than_secs))
        .context("Age is out of range")?;
    let cutoff = Utc::now() - age;

    let deleted = client
        .delete_jobs_before(cutoff)
        .await
        .context("Failed to delete jobs")?;

    println!(
        "{} Deleted {} job(s) completed before {}",
        style("✓").green().bold(),
        deleted,
        cutoff.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}
