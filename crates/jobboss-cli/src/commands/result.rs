//! Result command implementation.
//!
//! Print the arguments-to-result table for jobs or a whole batch.

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;

use super::common::{open_client, print_json, select_ids};
use crate::config::Settings;

/// Execute the result command.
pub async fn execute(
    settings: &Settings,
    job_ids: &[i64],
    batch: Option<&str>,
    format: &str,
) -> Result<()> {
    let client = open_client(&settings.database)?;
    let ids = select_ids(&client, job_ids, batch).await?;

    let table = client
        .result_table(&ids)
        .await
        .context("Failed to load results")?;

    if format == "json" {
        return print_json(&table);
    }

    println!(
        "{} Results for {} job(s):\n",
        style("→").cyan().bold(),
        table.len()
    );

    for entry in table.entries() {
        let args: Vec<String> = entry.args.iter().map(Value::to_string).collect();
        let result = match &entry.result {
            Some(value) => style(value.to_string()).green(),
            None => style("-".to_string()).dim(),
        };
        println!(
            "  {:<8} ({}) => {}",
            style(entry.job_id).dim(),
            args.join(", "),
            result
        );
    }

    Ok(())
}
