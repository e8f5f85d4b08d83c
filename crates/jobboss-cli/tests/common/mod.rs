//! Helpers for driving the `jobboss` binary against a scratch database.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobboss_sched::{Client, Job, JobId, SqliteStore};
use tempfile::TempDir;

pub const BIN: &str = env!("CARGO_BIN_EXE_jobboss");

/// A scratch database shared by the test, the boss and its employees.
pub struct Workspace {
    dir: TempDir,
    db: PathBuf,
    client: Client,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let client = Client::new(Arc::new(SqliteStore::new(&db).unwrap()));
        Self { dir, db, client }
    }

    pub fn db(&self) -> &Path {
        &self.db
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start `jobboss start` with a fast poll interval.
    pub fn start_boss(&self, employee_limit: usize) -> BossProcess {
        let child = Command::new(BIN)
            .arg("--database")
            .arg(&self.db)
            .args([
                "start",
                "--employee-limit",
                &employee_limit.to_string(),
                "--poll-interval-ms",
                "100",
            ])
            .env_remove("JOBBOSS_CONFIG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        BossProcess { child }
    }

    /// Run a client subcommand to completion.
    pub fn jobboss(&self, args: &[&str]) -> Output {
        Command::new(BIN)
            .arg("--database")
            .arg(&self.db)
            .args(args)
            .env_remove("JOBBOSS_CONFIG")
            .output()
            .unwrap()
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// A running boss. Killed on drop if the test did not stop it.
pub struct BossProcess {
    child: Child,
}

impl BossProcess {
    /// SIGTERM the boss and wait for it to exit.
    pub fn stop(&mut self) -> ExitStatus {
        signal(self.child.id(), libc::SIGTERM);
        self.child.wait().unwrap()
    }
}

impl Drop for BossProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            signal(self.child.id(), libc::SIGTERM);
            let _ = self.child.wait();
        }
    }
}

pub fn signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}

pub fn is_alive(pid: u32) -> bool {
    jobboss_sched::process::is_alive(pid)
}

/// Poll `check` until it yields a value or `timeout` passes.
pub async fn eventually<T, F, Fut>(timeout: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Wait until an employee has recorded its pid on the job.
pub async fn wait_until_assigned(client: &Client, id: JobId) -> Job {
    eventually(Duration::from_secs(15), move || async move {
        let job = client.job(id).await.unwrap();
        job.is_assigned().then_some(job)
    })
    .await
}
