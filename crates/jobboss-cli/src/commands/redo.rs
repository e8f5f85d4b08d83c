//! Redo command implementation.

use anyhow::{Context, Result};
use console::style;

use super::common::{open_client, select_ids};
use crate::config::Settings;

/// Execute the redo command: put jobs back to pending with their outcome cleared.
pub async fn execute(settings: &Settings, job_ids: &[i64], batch: Option<&str>) -> Result<()> {
    let client = open_client(&settings.database)?;
    let ids = select_ids(&client, job_ids, batch).await?;

    for id in &ids {
        client
            .redo(*id)
            .await
            .with_context(|| format!("Failed to redo job {id}"))?;
        println!("{} Requeued job {}", style("✓").green().bold(), style(id).bold());
    }

    Ok(())
}
