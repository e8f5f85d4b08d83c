//! Client-side operations on the job store: enqueue, cancel, redo, wait and
//! aggregate queries over sets of jobs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::batch::ResultTable;
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId, JobPath, JobState, NewJob};
use crate::persistence::JobStore;
use crate::registry::Registry;

/// Polling parameters for [`Client::wait_for_jobs`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Handle for submitting and inspecting jobs.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn JobStore>,
}

impl Client {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Insert a pending job. The path must look like `resource#action`.
    pub async fn enqueue(&self, job: NewJob) -> SchedResult<Job> {
        JobPath::parse(&job.path)?;
        let job = self.store.insert_job(&job).await?;
        debug!(job_id = %job.id, path = %job.path, "Job enqueued");
        Ok(job)
    }

    /// Enqueue `path` with positional arguments at default priority.
    pub async fn enqueue_path(
        &self,
        path: &str,
        args: Vec<serde_json::Value>,
    ) -> SchedResult<Job> {
        self.enqueue(NewJob::new(path, args)).await
    }

    /// Enqueue after checking that the registry can resolve the path.
    pub async fn enqueue_checked(&self, registry: &Registry, job: NewJob) -> SchedResult<Job> {
        registry.resolve_path(&job.path)?;
        self.enqueue(job).await
    }

    /// Load a job.
    pub async fn job(&self, job_id: JobId) -> SchedResult<Job> {
        self.store
            .load_job(job_id)
            .await?
            .ok_or(SchedError::JobNotFound(job_id))
    }

    /// Current state of a job.
    pub async fn status(&self, job_id: JobId) -> SchedResult<JobState> {
        Ok(self.job(job_id).await?.state())
    }

    /// Request cancellation. Idempotent; a running employee is stopped on
    /// the boss's next cleanup pass.
    pub async fn cancel(&self, job_id: JobId) -> SchedResult<()> {
        if !self.store.cancel(job_id, Utc::now()).await? {
            return Err(SchedError::JobNotFound(job_id));
        }
        info!(job_id = %job_id, "Cancel requested");
        Ok(())
    }

    /// Put a job back to pending, clearing its outcome.
    ///
    /// Running jobs are refused: their employee is still working and would
    /// finish alongside a second dispatch. Cancel first.
    pub async fn redo(&self, job_id: JobId) -> SchedResult<()> {
        if !self.store.redo_if_idle(job_id).await? {
            let state = self.status(job_id).await?;
            return Err(SchedError::InvalidJobState {
                job_id,
                expected: "pending, completed or cancelled".to_string(),
                found: state.name().to_string(),
            });
        }
        info!(job_id = %job_id, "Job marked for redo");
        Ok(())
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        self.store.list_jobs(filter).await
    }

    /// Load every job in `ids`; fails if any is missing.
    pub async fn jobs(&self, ids: &[JobId]) -> SchedResult<Vec<Job>> {
        let wanted: BTreeSet<JobId> = ids.iter().copied().collect();
        let jobs = self
            .store
            .list_jobs(&JobFilter::for_ids(wanted.iter().copied()))
            .await?;

        if jobs.len() != wanted.len() {
            let found: BTreeSet<JobId> = jobs.iter().map(|job| job.id).collect();
            if let Some(missing) = wanted.difference(&found).next() {
                return Err(SchedError::JobNotFound(*missing));
            }
        }
        Ok(jobs)
    }

    /// Block until every job in `ids` is terminal (cancelled counts).
    ///
    /// `progress` receives the completed percentage after each poll; the
    /// reported value never decreases.
    pub async fn wait_for_jobs<F>(
        &self,
        ids: &[JobId],
        options: &WaitOptions,
        mut progress: F,
    ) -> SchedResult<Vec<Job>>
    where
        F: FnMut(f64),
    {
        let started = Instant::now();
        let mut reported = 0.0f64;

        loop {
            let jobs = self.jobs(ids).await?;
            let finished = jobs.iter().filter(|job| job.state().is_terminal()).count();

            reported = reported.max(percent(finished, jobs.len()));
            progress(reported);

            if finished == jobs.len() {
                return Ok(jobs);
            }

            if let Some(timeout) = options.timeout {
                if started.elapsed() >= timeout {
                    return Err(SchedError::Timeout(format!(
                        "{finished} of {} jobs finished after {timeout:?}",
                        jobs.len()
                    )));
                }
            }

            tokio::time::sleep(options.poll_interval).await;
        }
    }

    /// Percentage of `ids` in a terminal state.
    pub async fn completed_percent(&self, ids: &[JobId]) -> SchedResult<f64> {
        let jobs = self.jobs(ids).await?;
        let finished = jobs.iter().filter(|job| job.state().is_terminal()).count();
        Ok(percent(finished, jobs.len()))
    }

    /// Map each job's arguments to its result.
    pub async fn result_table(&self, ids: &[JobId]) -> SchedResult<ResultTable> {
        Ok(ResultTable::from_jobs(&self.jobs(ids).await?))
    }

    /// Span from the first start to the last completion, once all are complete.
    pub async fn time_taken(&self, ids: &[JobId]) -> SchedResult<Option<chrono::Duration>> {
        Ok(span(&self.jobs(ids).await?))
    }

    /// Delete jobs completed before `before`; pending and running jobs are kept.
    pub async fn delete_jobs_before(&self, before: DateTime<Utc>) -> SchedResult<usize> {
        let deleted = self.store.delete_completed_before(before).await?;
        info!(deleted, before = %before, "Deleted completed jobs");
        Ok(deleted)
    }
}

pub(crate) fn percent(finished: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        finished as f64 * 100.0 / total as f64
    }
}

pub(crate) fn span(jobs: &[Job]) -> Option<chrono::Duration> {
    if jobs.is_empty() || jobs.iter().any(|job| !job.is_completed()) {
        return None;
    }
    let first = jobs.iter().filter_map(|job| job.started_at).min()?;
    let last = jobs.iter().filter_map(|job| job.completed_at).max()?;
    Some(last - first)
}
