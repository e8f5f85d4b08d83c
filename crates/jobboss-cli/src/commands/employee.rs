//! Employee command implementation.
//!
//! Entry point of the worker process the boss spawns for each job. Not meant
//! to be run by hand.

use anyhow::{Context, Result};

use jobboss_sched::employee::{self, EmployeeExit, EmployeeOptions};
use jobboss_sched::JobId;

use super::common::open_store;
use crate::config::Settings;
use crate::jobs;

/// Execute the employee command and exit the process.
///
/// Exits directly: after a termination signal the action may still occupy a
/// blocking thread, and the runtime would otherwise wait for it on drop.
pub async fn execute(settings: &Settings, job: i64) -> Result<()> {
    let store = open_store(&settings.database)?;
    let registry = jobs::registry();

    let exit = employee::run(store, &registry, JobId(job), &EmployeeOptions::default())
        .await
        .with_context(|| format!("Employee for job {job} failed"))?;

    let code = match exit {
        EmployeeExit::Completed(_) | EmployeeExit::Superseded => 0,
        EmployeeExit::Terminated => 143,
    };
    std::process::exit(code)
}
