//! Cancel command implementation.
//!
//! Marks jobs cancelled; the boss stops any running employee on its next pass.

use anyhow::{Context, Result};
use console::style;

use super::common::{open_client, select_ids};
use crate::config::Settings;

/// Execute the cancel command.
pub async fn execute(settings: &Settings, job_ids: &[i64], batch: Option<&str>) -> Result<()> {
    let client = open_client(&settings.database)?;
    let ids = select_ids(&client, job_ids, batch).await?;

    for id in &ids {
        client
            .cancel(*id)
            .await
            .with_context(|| format!("Failed to cancel job {id}"))?;
        println!("{} Cancelled job {}", style("✓").green().bold(), style(id).bold());
    }

    Ok(())
}
