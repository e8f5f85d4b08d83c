//! Persistence layer for job records.
//!
//! The store is the only state shared between the boss and its employees.
//! Every coordination step is a read or a conditional write against it.

mod sqlite_store;

pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dequeue::{GroupStats, JobGroup};
use crate::error::SchedResult;
use crate::job::{Job, JobFilter, JobId, NewJob, Outcome};

/// Trait for durable job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job. The store assigns the id and `created_at`.
    async fn insert_job(&self, job: &NewJob) -> SchedResult<Job>;

    /// Load a job from the store.
    async fn load_job(&self, job_id: JobId) -> SchedResult<Option<Job>>;

    /// List jobs matching a filter, ordered by id.
    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>>;

    /// Count jobs matching a filter.
    async fn count_jobs(&self, filter: &JobFilter) -> SchedResult<usize>;

    /// Set `started_at` if the job is unstarted and not cancelled.
    ///
    /// Returns `false` when another scheduler won the claim.
    async fn claim_job(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool>;

    /// Record the host and pid of the employee running a job.
    async fn mark_employee(&self, job_id: JobId, host: &str, pid: u32) -> SchedResult<()>;

    /// Write the outcome, status and `completed_at` in one update.
    ///
    /// Only applies to a started, uncompleted job; returns `false` otherwise.
    async fn finalize(&self, job_id: JobId, outcome: &Outcome, at: DateTime<Utc>)
        -> SchedResult<bool>;

    /// Mark a started, uncompleted job as missing in action.
    async fn mark_mia(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool>;

    /// Record a cancel request. The first timestamp is kept.
    ///
    /// Returns `false` if the job does not exist.
    async fn cancel(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool>;

    /// Clear every terminal and assignment field so the job is pending again.
    ///
    /// Unconditional. Only the boss and the employee that owns the job use it.
    async fn redo(&self, job_id: JobId) -> SchedResult<bool>;

    /// [`JobStore::redo`] for a job no employee may still be working on:
    /// pending, completed or cancelled.
    ///
    /// Returns `false` if the job does not exist or is running.
    async fn redo_if_idle(&self, job_id: JobId) -> SchedResult<bool>;

    /// Distinct fairness groups with at least one pending job, oldest first.
    async fn pending_groups(&self) -> SchedResult<Vec<GroupStats>>;

    /// Oldest pending jobs of a group.
    async fn oldest_pending(&self, group: &JobGroup, limit: usize) -> SchedResult<Vec<Job>>;

    /// Delete jobs completed before `before`. Unfinished jobs are never removed.
    async fn delete_completed_before(&self, before: DateTime<Utc>) -> SchedResult<usize>;
}
