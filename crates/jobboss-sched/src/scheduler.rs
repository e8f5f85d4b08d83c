//! The boss: a single-threaded, poll-driven loop that keeps up to
//! `employee_limit` employees busy.
//!
//! Each iteration cleans up the tracked set (finished, cancelled and missing
//! employees), computes free capacity, dequeues fairly and dispatches. The
//! loop sleeps whenever nothing was dispatched, so cancellation and MIA
//! detection latency are bounded by the poll interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::BossConfig;
use crate::dequeue::dequeue;
use crate::dispatch::{Dispatcher, Employee};
use crate::error::{SchedError, SchedResult};
use crate::job::{JobFilter, JobId};
use crate::persistence::JobStore;
use crate::process::ProcessControl;

/// Minimum spacing between two retention sweeps.
const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

/// Long-running coordinator owning the tracked running set.
pub struct Boss {
    config: BossConfig,
    dispatcher: Dispatcher,
    tracked: BTreeMap<JobId, Employee>,
    last_retention: Option<Instant>,
}

impl Boss {
    /// Create a boss. Fails if the configuration is invalid.
    pub fn new(
        config: BossConfig,
        store: Arc<dyn JobStore>,
        processes: Arc<dyn ProcessControl>,
    ) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher: Dispatcher::new(store, processes),
            tracked: BTreeMap::new(),
            last_retention: None,
        })
    }

    pub fn config(&self) -> &BossConfig {
        &self.config
    }

    /// Employees currently tracked as running, by job id.
    pub fn tracked(&self) -> impl Iterator<Item = &Employee> {
        self.tracked.values()
    }

    pub fn is_tracking(&self, job_id: JobId) -> bool {
        self.tracked.contains_key(&job_id)
    }

    /// Free employee slots.
    pub fn capacity(&self) -> usize {
        self.config.employee_limit.saturating_sub(self.tracked.len())
    }

    fn store(&self) -> &dyn JobStore {
        self.dispatcher.store().as_ref()
    }

    fn processes(&self) -> &dyn ProcessControl {
        self.dispatcher.processes().as_ref()
    }

    /// Reconcile the tracked set with the store.
    ///
    /// Drops jobs that completed on their own, terminates and drops cancelled
    /// or redone ones and marks jobs whose employee disappeared as MIA.
    pub async fn cleanup(&mut self) -> SchedResult<()> {
        if self.tracked.is_empty() {
            return Ok(());
        }

        let ids: Vec<JobId> = self.tracked.keys().copied().collect();
        let jobs: FxHashMap<JobId, _> = self
            .store()
            .list_jobs(&JobFilter::for_ids(ids))
            .await?
            .into_iter()
            .map(|job| (job.id, job))
            .collect();

        let mut released = Vec::new();
        for (job_id, employee) in &self.tracked {
            let Some(job) = jobs.get(job_id) else {
                warn!(job_id = %job_id, "Tracked job disappeared from the store");
                released.push(*job_id);
                continue;
            };

            if job.is_completed() {
                debug!(job_id = %job_id, state = %job.state(), "Employee finished");
                released.push(*job_id);
            } else if job.is_cancelled() {
                match self.processes().terminate(employee.pid) {
                    Ok(()) => info!(job_id = %job_id, pid = employee.pid, "Cancelled job, employee terminated"),
                    Err(e) => error!(job_id = %job_id, pid = employee.pid, error = %e, "Failed to terminate cancelled job"),
                }
                released.push(*job_id);
            } else if job.started_at.is_none() {
                // Redone while running: the employee must not outlive its claim.
                match self.processes().terminate(employee.pid) {
                    Ok(()) => warn!(job_id = %job_id, pid = employee.pid, "Job was redone while running, employee terminated"),
                    Err(e) => error!(job_id = %job_id, pid = employee.pid, error = %e, "Failed to terminate employee of redone job"),
                }
                released.push(*job_id);
            } else if !self.processes().is_alive(employee.pid) {
                let vanished = SchedError::EmployeeVanished {
                    job_id: *job_id,
                    pid: employee.pid,
                };
                if self.store().mark_mia(*job_id, Utc::now()).await? {
                    warn!(job_id = %job_id, pid = employee.pid, "{vanished}, marked MIA");
                }
                released.push(*job_id);
            }
        }

        for job_id in released {
            self.tracked.remove(&job_id);
        }
        Ok(())
    }

    /// Run one scheduler iteration. Returns the number of jobs dispatched.
    pub async fn tick(&mut self) -> SchedResult<usize> {
        self.cleanup().await?;
        self.apply_retention().await;

        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(0);
        }

        let candidates = dequeue(self.store(), self.config.employee_limit).await?;

        let mut dispatched = 0;
        for job in candidates {
            if dispatched == capacity {
                break;
            }

            match self.dispatcher.dispatch(&job).await {
                Ok(employee) => {
                    self.tracked.insert(employee.job_id, employee);
                    dispatched += 1;
                }
                Err(SchedError::ClaimConflict(job_id)) => {
                    debug!(job_id = %job_id, "Job claimed by another scheduler, skipping");
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to dispatch job");
                }
            }
        }

        Ok(dispatched)
    }

    /// Delete old finished jobs if a retention window is configured.
    async fn apply_retention(&mut self) {
        let Some(retention) = self.config.retention else {
            return;
        };
        if self
            .last_retention
            .is_some_and(|at| at.elapsed() < RETENTION_INTERVAL)
        {
            return;
        }
        self.last_retention = Some(Instant::now());

        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return;
        };

        match self.store().delete_completed_before(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, cutoff = %cutoff, "Deleted old jobs"),
            Err(e) => warn!(error = %e, "Retention sweep failed"),
        }
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped), then stop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedResult<()> {
        info!(
            employee_limit = self.config.employee_limit,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Job boss started"
        );

        let mut failures = 0u32;
        while !*shutdown.borrow() {
            let delay = match self.tick().await {
                Ok(dispatched) if dispatched > 0 => {
                    failures = 0;
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(_) => {
                    failures = 0;
                    self.config.poll_interval
                }
                Err(e) if e.is_transient() => {
                    let delay = self.config.backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Job store unavailable, backing off"
                    );
                    delay
                }
                Err(e) => {
                    error!(error = %e, "Boss iteration failed");
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.stop().await
    }

    /// Terminate every tracked employee and put its job back to pending.
    pub async fn stop(&mut self) -> SchedResult<()> {
        if let Err(e) = self.cleanup().await {
            warn!(error = %e, "Cleanup before shutdown failed");
        }

        info!(running = self.tracked.len(), "Stopping running employees");

        let mut first_error = None;
        for (job_id, employee) in std::mem::take(&mut self.tracked) {
            if let Err(e) = self.processes().terminate(employee.pid) {
                warn!(job_id = %job_id, pid = employee.pid, error = %e, "Failed to terminate employee");
            }
            match self.store().redo(job_id).await {
                Ok(_) => info!(job_id = %job_id, "Job requeued for next start"),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to requeue job");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("Job boss stopped");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobState, NewJob, Outcome};
    use crate::persistence::SqliteStore;
    use crate::test_support::{FakeProcesses, FlakyStore};
    use serde_json::json;

    fn boss_with(
        store: Arc<dyn JobStore>,
        fake: Arc<FakeProcesses>,
        config: BossConfig,
    ) -> Boss {
        Boss::new(config, store, fake).unwrap()
    }

    fn setup(limit: usize) -> (Arc<SqliteStore>, Arc<FakeProcesses>, Boss) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let fake = Arc::new(FakeProcesses::new());
        let boss = boss_with(
            store.clone(),
            fake.clone(),
            BossConfig::default()
                .with_employee_limit(limit)
                .with_poll_interval(Duration::from_millis(10)),
        );
        (store, fake, boss)
    }

    async fn enqueue(store: &SqliteStore, path: &str, arg: i64, batch: Option<&str>) -> JobId {
        let mut job = NewJob::new(path, vec![json!(arg)]);
        if let Some(batch) = batch {
            job = job.in_batch(batch);
        }
        store.insert_job(&job).await.unwrap().id
    }

    async fn drain_ticks(boss: &mut Boss) {
        while boss.tick().await.unwrap() > 0 {}
    }

    async fn state(store: &SqliteStore, id: JobId) -> JobState {
        store.load_job(id).await.unwrap().unwrap().state()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let result = Boss::new(
            BossConfig::default().with_employee_limit(0),
            store,
            Arc::new(FakeProcesses::new()),
        );
        assert!(matches!(result, Err(SchedError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_respects_employee_limit() {
        let (store, fake, mut boss) = setup(4);
        for n in 0..6 {
            enqueue(&store, "math#is_prime?", n, None).await;
        }

        drain_ticks(&mut boss).await;

        assert_eq!(boss.tracked().count(), 4);
        assert_eq!(boss.capacity(), 0);
        assert_eq!(fake.spawned().len(), 4);
        assert_eq!(
            store.count_jobs(&JobFilter::pending()).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_fairness_gives_second_batch_a_slot() {
        let (store, _fake, mut boss) = setup(4);
        let mut b1 = Vec::new();
        for n in 0..4 {
            b1.push(enqueue(&store, "sleep#sleep_for", n, Some("b1")).await);
        }
        let b2 = enqueue(&store, "sleep#sleep_for", 3, Some("b2")).await;

        drain_ticks(&mut boss).await;

        assert!(boss.is_tracking(b1[0]));
        assert!(boss.is_tracking(b1[1]));
        assert!(boss.is_tracking(b1[2]));
        assert!(boss.is_tracking(b2));
        assert!(!boss.is_tracking(b1[3]));
        assert_eq!(state(&store, b1[3]).await, JobState::Pending);
    }

    #[tokio::test]
    async fn test_completed_jobs_free_capacity() {
        let (store, _fake, mut boss) = setup(1);
        let first = enqueue(&store, "math#is_prime?", 1, None).await;
        let second = enqueue(&store, "math#is_prime?", 2, None).await;

        drain_ticks(&mut boss).await;
        assert!(boss.is_tracking(first));

        store
            .finalize(first, &Outcome::Success(json!(false)), Utc::now())
            .await
            .unwrap();

        drain_ticks(&mut boss).await;
        assert!(!boss.is_tracking(first));
        assert!(boss.is_tracking(second));
        assert_eq!(state(&store, first).await, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_terminated_not_redone() {
        let (store, fake, mut boss) = setup(2);
        let id = enqueue(&store, "penguin#snooze", 3, None).await;

        drain_ticks(&mut boss).await;
        let pid = boss.tracked().next().unwrap().pid;

        store.cancel(id, Utc::now()).await.unwrap();
        boss.tick().await.unwrap();

        assert!(!boss.is_tracking(id));
        assert_eq!(fake.terminated(), vec![pid]);
        assert!(!fake.is_alive(pid));
        assert_eq!(state(&store, id).await, JobState::Cancelled);

        // Not picked up again.
        drain_ticks(&mut boss).await;
        assert_eq!(fake.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_redo_while_running_never_runs_job_twice() {
        let (store, fake, mut boss) = setup(2);
        let id = enqueue(&store, "penguin#snooze", 3, None).await;

        boss.tick().await.unwrap();
        let first_pid = boss.tracked().next().unwrap().pid;

        let client = crate::client::Client::new(store.clone());
        assert!(matches!(
            client.redo(id).await,
            Err(SchedError::InvalidJobState { .. })
        ));
        boss.tick().await.unwrap();
        boss.tick().await.unwrap();
        assert_eq!(fake.spawned(), vec![(id, first_pid)]);

        // A raw reset still leaves at most one live employee.
        store.redo(id).await.unwrap();
        boss.tick().await.unwrap();

        assert_eq!(fake.terminated(), vec![first_pid]);
        assert!(!fake.is_alive(first_pid));
        let live: Vec<u32> = fake
            .spawned()
            .into_iter()
            .map(|(_, pid)| pid)
            .filter(|pid| fake.is_alive(*pid))
            .collect();
        assert_eq!(live.len(), 1);
        assert!(boss.is_tracking(id));
        assert_eq!(state(&store, id).await, JobState::Running);
    }

    #[tokio::test]
    async fn test_vanished_employee_marked_mia() {
        let (store, fake, mut boss) = setup(2);
        let id = enqueue(&store, "penguin#snooze", 3, None).await;

        drain_ticks(&mut boss).await;
        let pid = boss.tracked().next().unwrap().pid;

        fake.vanish(pid);
        boss.cleanup().await.unwrap();

        assert!(!boss.is_tracking(id));
        let job = store.load_job(id).await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Mia);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stop_redoes_running_jobs() {
        let (store, fake, mut boss) = setup(4);
        let a = enqueue(&store, "sleep#sleep_for", 5, None).await;
        let b = enqueue(&store, "sleep#sleep_for", 5, Some("b")).await;

        drain_ticks(&mut boss).await;
        assert_eq!(boss.tracked().count(), 2);

        boss.stop().await.unwrap();

        assert_eq!(boss.tracked().count(), 0);
        assert_eq!(fake.terminated().len(), 2);
        assert_eq!(state(&store, a).await, JobState::Pending);
        assert_eq!(state(&store, b).await, JobState::Pending);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let (store, fake, mut boss) = setup(2);
        let id = enqueue(&store, "sleep#sleep_for", 5, None).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            boss.run(rx).await.unwrap();
            boss
        });

        for _ in 0..100 {
            if !fake.spawned().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fake.spawned().len(), 1);

        tx.send(true).unwrap();
        let boss = handle.await.unwrap();

        assert_eq!(boss.tracked().count(), 0);
        assert_eq!(state(&store, id).await, JobState::Pending);
    }

    #[tokio::test]
    async fn test_run_backs_off_on_store_errors() {
        let sqlite = SqliteStore::in_memory().unwrap();
        sqlite
            .insert_job(&NewJob::new("math#is_prime?", vec![json!(7)]))
            .await
            .unwrap();
        let store: Arc<dyn JobStore> = Arc::new(FlakyStore::new(sqlite).fail_reads(3));
        let fake = Arc::new(FakeProcesses::new());

        let mut config = BossConfig::default().with_poll_interval(Duration::from_millis(5));
        config.store_backoff_max = Duration::from_millis(20);
        let mut boss = boss_with(store, fake.clone(), config);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { boss.run(rx).await });

        for _ in 0..200 {
            if !fake.spawned().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fake.spawned().len(), 1);

        drop(tx);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retention_deletes_old_jobs() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let fake = Arc::new(FakeProcesses::new());
        let mut boss = boss_with(
            store.clone(),
            fake,
            BossConfig::default().with_retention(Duration::from_secs(3600)),
        );

        let old = Utc::now() - chrono::Duration::hours(2);
        let done = enqueue(&store, "math#is_prime?", 2, None).await;
        store.claim_job(done, old).await.unwrap();
        store
            .finalize(done, &Outcome::Success(json!(true)), old)
            .await
            .unwrap();
        let pending = enqueue(&store, "math#is_prime?", 3, Some("keep")).await;
        store.cancel(pending, Utc::now()).await.unwrap();

        boss.tick().await.unwrap();

        assert!(store.load_job(done).await.unwrap().is_none());
        assert!(store.load_job(pending).await.unwrap().is_some());
    }
}
