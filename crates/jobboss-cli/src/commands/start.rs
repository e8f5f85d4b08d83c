//! Start command implementation.
//!
//! Run the boss in the foreground until SIGINT or SIGTERM. Each job runs in
//! a child `jobboss employee` process against the same database.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::info;

use jobboss_sched::{Boss, OsProcessControl};

use super::common::open_store;
use crate::config::Settings;

/// Execute the start command.
pub async fn execute(settings: &Settings, config_file: Option<&Path>, verbose: u8) -> Result<()> {
    let store = open_store(&settings.database)?;
    let processes = OsProcessControl::current_exe(employee_args(settings, config_file, verbose))
        .context("Failed to locate the jobboss executable")?;

    let config = settings.boss_config();
    let mut boss = Boss::new(config.clone(), store, Arc::new(processes))
        .context("Invalid boss configuration")?;

    eprintln!(
        "{} Job boss started on {} ({} employees, polling every {}ms)",
        style("→").cyan().bold(),
        style(settings.database.display()).dim(),
        config.employee_limit,
        config.poll_interval.as_millis()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(true);
    });

    boss.run(shutdown_rx).await.context("Job boss stopped with an error")?;

    eprintln!("{} Job boss stopped", style("✓").green().bold());
    Ok(())
}

/// Leading arguments for `jobboss ... employee`; the boss appends `--job <id>`.
fn employee_args(settings: &Settings, config_file: Option<&Path>, verbose: u8) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--database".into(), settings.database.clone().into()];

    if let Some(path) = config_file {
        args.push("--config".into());
        args.push(path.into());
    }

    if verbose > 0 {
        args.push(format!("-{}", "v".repeat(verbose as usize)).into());
    }

    args.push("employee".into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_employee_args() {
        let settings = Settings {
            database: PathBuf::from("/tmp/jobs.db"),
            ..Settings::default()
        };

        let args = employee_args(&settings, None, 0);
        assert_eq!(args, vec!["--database", "/tmp/jobs.db", "employee"]);

        let args = employee_args(&settings, Some(Path::new("boss.yaml")), 2);
        assert_eq!(
            args,
            vec!["--database", "/tmp/jobs.db", "--config", "boss.yaml", "-vv", "employee"]
        );
    }
}
