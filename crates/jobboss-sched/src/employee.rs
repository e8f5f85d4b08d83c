//! Employee runtime: the worker side of dispatch.
//!
//! An employee is a separate OS process that executes exactly one job. It
//! records its host and pid, lowers its own scheduling priority, runs the
//! job's action and then always finalizes the record, retrying the write
//! until it lands. A termination signal puts the job back to pending unless
//! the job was cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobError, JobId, JobState, Outcome};
use crate::persistence::JobStore;
use crate::process;
use crate::registry::Registry;

/// Tunables for an employee process.
#[derive(Debug, Clone)]
pub struct EmployeeOptions {
    /// Niceness applied on start.
    pub niceness: i32,

    /// First delay between finalize attempts.
    pub finalize_retry: Duration,

    /// Ceiling for the finalize retry delay.
    pub finalize_retry_max: Duration,
}

impl Default for EmployeeOptions {
    fn default() -> Self {
        Self {
            niceness: 19,
            finalize_retry: Duration::from_secs(1),
            finalize_retry_max: Duration::from_secs(30),
        }
    }
}

/// How an employee run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmployeeExit {
    /// The outcome was written; the job is in this terminal state.
    Completed(JobState),

    /// The job was already finished or redone by someone else; nothing written.
    Superseded,

    /// A termination signal arrived before the action returned.
    Terminated,
}

/// Run the job `job_id` in this process.
///
/// The termination handler is installed before the first store write. A
/// setup failure after the job is loaded is recorded as the job's error
/// instead of leaving it running.
pub async fn run(
    store: Arc<dyn JobStore>,
    registry: &Registry,
    job_id: JobId,
    options: &EmployeeOptions,
) -> SchedResult<EmployeeExit> {
    let mut terminate = signal(SignalKind::terminate())?;

    let job = retry_transient(job_id, "load job", options, || store.load_job(job_id))
        .await?
        .ok_or(SchedError::JobNotFound(job_id))?;

    let state = job.state();
    if state != JobState::Running {
        return Err(SchedError::InvalidJobState {
            job_id,
            expected: JobState::Running.name().to_string(),
            found: state.name().to_string(),
        });
    }

    process::lower_priority(options.niceness);
    let host = process::hostname();
    let pid = std::process::id();
    let registered = retry_transient(job_id, "record employee", options, || {
        store.mark_employee(job_id, &host, pid)
    })
    .await;

    let outcome = match registered {
        Ok(()) => {
            info!(job_id = %job_id, path = %job.path, "Employee started");
            tokio::select! {
                outcome = execute(registry, &job) => outcome,
                _ = terminate.recv() => {
                    handle_termination(store.as_ref(), &job).await?;
                    return Ok(EmployeeExit::Terminated);
                }
            }
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Employee setup failed");
            Outcome::Error(JobError::from(&e).with_backtrace(call_site(&job)))
        }
    };

    if let Outcome::Error(ref e) = outcome {
        let failure = SchedError::ExecutionFailure {
            class: e.class.clone(),
            message: e.message.clone(),
        };
        error!(job_id = %job_id, error = %failure, "Job failed");
    }

    if finalize_with_retry(store.as_ref(), job_id, &outcome, options).await {
        let state = match outcome {
            Outcome::Success(_) => JobState::Succeeded,
            Outcome::Error(_) => JobState::Failed,
        };
        info!(job_id = %job_id, state = %state, "Job completed");
        Ok(EmployeeExit::Completed(state))
    } else {
        warn!(job_id = %job_id, "Job was finalized or redone elsewhere, outcome discarded");
        Ok(EmployeeExit::Superseded)
    }
}

/// Retry a store call while it fails transiently, with the finalize backoff.
async fn retry_transient<T, F, Fut>(
    job_id: JobId,
    what: &str,
    options: &EmployeeOptions,
    mut call: F,
) -> SchedResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedResult<T>>,
{
    let mut delay = options.finalize_retry;
    let mut attempt = 1u32;

    loop {
        match call().await {
            Err(e) if e.is_transient() => {
                warn!(
                    job_id = %job_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Failed to {what}, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(options.finalize_retry_max);
                attempt = attempt.saturating_add(1);
            }
            result => return result,
        }
    }
}

/// Resolve and run a job's action on the blocking pool.
///
/// Resolution failures and panics become [`Outcome::Error`]; nothing here
/// propagates out of the employee.
pub async fn execute(registry: &Registry, job: &Job) -> Outcome {
    let action = match registry.resolve_path(&job.path) {
        Ok(action) => action,
        Err(e) => return Outcome::Error(JobError::from(&e).with_backtrace(call_site(job))),
    };

    let args = job.args.clone();
    match tokio::task::spawn_blocking(move || action(args.as_slice())).await {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(e)) => Outcome::Error(JobError::from(e).with_backtrace(call_site(job))),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                join_error.to_string()
            };
            Outcome::Error(JobError::new("panic", message).with_backtrace(call_site(job)))
        }
    }
}

fn call_site(job: &Job) -> Vec<String> {
    let args: Vec<String> = job.args.iter().map(Value::to_string).collect();
    vec![format!("{}({})", job.path, args.join(", "))]
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked".to_string()
    }
}

/// Write the outcome, retrying with capped exponential backoff until the
/// store accepts it.
///
/// Returns `false` if the store reports the job no longer needs finalizing.
pub async fn finalize_with_retry(
    store: &dyn JobStore,
    job_id: JobId,
    outcome: &Outcome,
    options: &EmployeeOptions,
) -> bool {
    let mut delay = options.finalize_retry;
    let mut attempt = 1u32;

    loop {
        match store.finalize(job_id, outcome, Utc::now()).await {
            Ok(applied) => return applied,
            Err(e) => {
                let failure = SchedError::FinalizationFailure {
                    job_id,
                    message: e.to_string(),
                };
                warn!(
                    job_id = %job_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Retrying finalize"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(options.finalize_retry_max);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// React to SIGTERM: a cancelled job stays cancelled, anything else is redone.
///
/// `claimed` is the record as this employee loaded it. If the job has been
/// redone or claimed again since, it belongs to someone else and is left alone.
pub async fn handle_termination(store: &dyn JobStore, claimed: &Job) -> SchedResult<()> {
    let job_id = claimed.id;
    match store.load_job(job_id).await? {
        Some(job) if job.is_cancelled() => {
            info!(job_id = %job_id, "Employee terminated after cancellation");
        }
        Some(job) if job.is_completed() => {}
        Some(job) if job.started_at != claimed.started_at => {
            info!(job_id = %job_id, "Employee terminated, job no longer ours");
        }
        Some(_) => {
            store.redo(job_id).await?;
            info!(job_id = %job_id, "Employee terminated, job requeued");
        }
        None => {}
    }
    Ok(())
}
