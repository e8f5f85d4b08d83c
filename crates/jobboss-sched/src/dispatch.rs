//! Scheduler side of dispatch: claim a pending job, then spawn its employee.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::persistence::JobStore;
use crate::process::ProcessControl;

/// A dispatched job and the pid of the process running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Employee {
    pub job_id: JobId,
    pub pid: u32,
}

/// Claims jobs and starts employees for them.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    processes: Arc<dyn ProcessControl>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, processes: Arc<dyn ProcessControl>) -> Self {
        Self { store, processes }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn processes(&self) -> &Arc<dyn ProcessControl> {
        &self.processes
    }

    /// Dispatch a pending job.
    ///
    /// The conditional claim is the only guard against double execution: if
    /// it affects nothing this returns [`SchedError::ClaimConflict`] without
    /// spawning. A spawn failure after a successful claim puts the job back
    /// to pending.
    pub async fn dispatch(&self, job: &Job) -> SchedResult<Employee> {
        let state = job.state();
        if state != JobState::Pending {
            return Err(SchedError::InvalidJobState {
                job_id: job.id,
                expected: JobState::Pending.name().to_string(),
                found: state.name().to_string(),
            });
        }

        if !self.store.claim_job(job.id, Utc::now()).await? {
            return Err(SchedError::ClaimConflict(job.id));
        }

        info!(job_id = %job.id, path = %job.path, "Dispatching job");

        match self.processes.spawn_employee(job.id) {
            Ok(pid) => {
                info!(job_id = %job.id, pid, "Employee started");
                Ok(Employee { job_id: job.id, pid })
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to start employee, releasing claim");
                if let Err(redo_err) = self.store.redo(job.id).await {
                    error!(job_id = %job.id, error = %redo_err, "Failed to release claim");
                }
                Err(e)
            }
        }
    }
}
