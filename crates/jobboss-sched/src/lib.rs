//! Job Boss: a persistent-queue job scheduler with process-isolated employees
//!
//! A long-running boss dequeues jobs from a SQLite-backed store and runs each
//! one in its own OS process (an "employee"), tracking lifecycle, failures,
//! cancellation and fairness across competing job groups.
//!
//! # Overview
//!
//! 1. **Enqueue**: a [`Client`] or [`Batch`] inserts a pending job naming a
//!    `"<resource>#<action>"` path and JSON arguments
//! 2. **Dequeue**: the [`Boss`] picks candidates group-fairly by
//!    `(priority, path, batch_id)`
//! 3. **Dispatch**: a conditional claim sets `started_at`, then an employee
//!    process is spawned for the job
//! 4. **Execute**: the employee resolves the path in a [`Registry`], runs the
//!    action and always finalizes the record
//! 5. **Supervise**: the boss terminates cancelled employees, marks vanished
//!    ones MIA and requeues running work on shutdown
//!
//! # Job States
//!
//! | State | `started_at` | `completed_at` | `cancelled_at` | `status` |
//! |-------|--------------|----------------|----------------|----------|
//! | Pending | null | null | null | - |
//! | Running | set | null | null | - |
//! | Succeeded | set | set | any | success |
//! | Failed | set | set | any | error |
//! | MIA | set | set | any | mia |
//! | Cancelled | any | null | set | - |
//!
//! # Example: Running a Boss
//!
//! ```ignore
//! use std::sync::Arc;
//! use jobboss_sched::{Boss, BossConfig, OsProcessControl, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::new("./jobs.db")?);
//! let processes = Arc::new(OsProcessControl::current_exe(["employee", "--database", "./jobs.db"])?);
//! let mut boss = Boss::new(BossConfig::default(), store, processes)?;
//!
//! let (tx, rx) = tokio::sync::watch::channel(false);
//! boss.run(rx).await?;
//! ```
//!
//! # Example: Enqueue and Wait
//!
//! ```ignore
//! use jobboss_sched::{Batch, Client, WaitOptions};
//! use serde_json::json;
//!
//! let client = Client::new(store);
//! let batch = Batch::new(client.clone());
//! for n in 0..=10 {
//!     batch.enqueue("math#is_prime?", vec![json!(n)]).await?;
//! }
//!
//! batch.wait(&WaitOptions::default(), |pct| println!("{pct:.0}%")).await?;
//! let results = batch.result_table().await?;
//! assert_eq!(results.get(&[json!(7)]), Some(&json!(true)));
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod dequeue;
pub mod dispatch;
pub mod employee;
pub mod error;
pub mod job;
pub mod persistence;
pub mod process;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
mod test_support;

// Re-exports
pub use batch::{Batch, BatchId, ResultEntry, ResultTable};
pub use client::{Client, WaitOptions};
pub use config::BossConfig;
pub use dequeue::{GroupStats, JobGroup, dequeue, effective_take};
pub use dispatch::{Dispatcher, Employee};
pub use employee::{EmployeeExit, EmployeeOptions};
pub use error::{SchedError, SchedResult};
pub use job::{
    CompletionStatus, Job, JobError, JobFilter, JobId, JobPath, JobState, NewJob, Outcome,
    Priority,
};
pub use persistence::{JobStore, SqliteStore};
pub use process::{OsProcessControl, ProcessControl};
pub use registry::{Action, ActionError, Registry, Resource, arg};
pub use scheduler::Boss;
