//! In-process fakes shared by unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;

use crate::dequeue::{GroupStats, JobGroup};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId, NewJob, Outcome};
use crate::persistence::JobStore;
use crate::process::ProcessControl;

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    alive: FxHashSet<u32>,
    spawned: Vec<(JobId, u32)>,
    terminated: Vec<u32>,
    fail_spawn: bool,
}

/// Process control that hands out fake pids and never starts anything.
#[derive(Default)]
pub struct FakeProcesses {
    state: Mutex<FakeState>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn failing() -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().fail_spawn = true;
        fake
    }

    /// Simulate an out-of-band kill.
    pub fn vanish(&self, pid: u32) {
        self.state.lock().unwrap().alive.remove(&pid);
    }

    pub fn spawned(&self) -> Vec<(JobId, u32)> {
        self.state.lock().unwrap().spawned.clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.state.lock().unwrap().terminated.clone()
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn_employee(&self, job_id: JobId) -> SchedResult<u32> {
        let mut state = self.state.lock().unwrap();
        if state.fail_spawn {
            return Err(SchedError::SpawnFailed {
                job_id,
                message: "fake spawn failure".to_string(),
            });
        }
        state.next_pid += 1;
        let pid = state.next_pid;
        state.alive.insert(pid);
        state.spawned.push((job_id, pid));
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> SchedResult<()> {
        let mut state = self.state.lock().unwrap();
        state.alive.remove(&pid);
        state.terminated.push(pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().unwrap().alive.contains(&pid)
    }
}

/// Store wrapper that fails a configurable number of calls before delegating.
pub struct FlakyStore<S> {
    inner: S,
    finalize_failures: AtomicU32,
    read_failures: AtomicU32,
    mark_employee_failures: AtomicU32,
    reject_mark_employee: bool,
}

impl<S: JobStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finalize_failures: AtomicU32::new(0),
            read_failures: AtomicU32::new(0),
            mark_employee_failures: AtomicU32::new(0),
            reject_mark_employee: false,
        }
    }

    /// Fail the next `n` finalize calls.
    pub fn fail_finalize(self, n: u32) -> Self {
        self.finalize_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` employee registrations with a transient error.
    pub fn fail_mark_employee(self, n: u32) -> Self {
        self.mark_employee_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every employee registration with a permanent error.
    pub fn reject_mark_employee(mut self) -> Self {
        self.reject_mark_employee = true;
        self
    }

    /// Fail the next `n` pending-group reads.
    pub fn fail_reads(self, n: u32) -> Self {
        self.read_failures.store(n, Ordering::SeqCst);
        self
    }

    fn trip(counter: &AtomicU32) -> SchedResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(SchedError::StoreUnavailable("database is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: JobStore> JobStore for FlakyStore<S> {
    async fn insert_job(&self, job: &NewJob) -> SchedResult<Job> {
        self.inner.insert_job(job).await
    }

    async fn load_job(&self, job_id: JobId) -> SchedResult<Option<Job>> {
        self.inner.load_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        self.inner.list_jobs(filter).await
    }

    async fn count_jobs(&self, filter: &JobFilter) -> SchedResult<usize> {
        self.inner.count_jobs(filter).await
    }

    async fn claim_job(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        self.inner.claim_job(job_id, at).await
    }

    async fn mark_employee(&self, job_id: JobId, host: &str, pid: u32) -> SchedResult<()> {
        if self.reject_mark_employee {
            return Err(SchedError::Internal("employee columns are read-only".to_string()));
        }
        Self::trip(&self.mark_employee_failures)?;
        self.inner.mark_employee(job_id, host, pid).await
    }

    async fn finalize(
        &self,
        job_id: JobId,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> SchedResult<bool> {
        Self::trip(&self.finalize_failures)?;
        self.inner.finalize(job_id, outcome, at).await
    }

    async fn mark_mia(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        self.inner.mark_mia(job_id, at).await
    }

    async fn cancel(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        self.inner.cancel(job_id, at).await
    }

    async fn redo(&self, job_id: JobId) -> SchedResult<bool> {
        self.inner.redo(job_id).await
    }

    async fn redo_if_idle(&self, job_id: JobId) -> SchedResult<bool> {
        self.inner.redo_if_idle(job_id).await
    }

    async fn pending_groups(&self) -> SchedResult<Vec<GroupStats>> {
        Self::trip(&self.read_failures)?;
        self.inner.pending_groups().await
    }

    async fn oldest_pending(&self, group: &JobGroup, limit: usize) -> SchedResult<Vec<Job>> {
        self.inner.oldest_pending(group, limit).await
    }

    async fn delete_completed_before(&self, before: DateTime<Utc>) -> SchedResult<usize> {
        self.inner.delete_completed_before(before).await
    }
}
