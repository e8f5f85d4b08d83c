//! Job types and the job lifecycle state machine.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchedError, SchedResult};

/// Store-assigned job identifier. Ascending ids follow creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl JobId {
    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim().parse()?))
    }

    /// Get the numeric value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job priority. Acts as a weight in the fair dequeue: higher values get more
/// slots per scheduler iteration. Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u32);

impl Priority {
    /// Default priority (1).
    pub const DEFAULT: Priority = Priority(1);

    /// Create a new priority, clamped to at least 1.
    pub fn new(value: u32) -> Self {
        Self(value.max(1))
    }

    /// Get the numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Target of a job: `"<resource>#<action>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobPath {
    pub resource: String,
    pub action: String,
}

impl JobPath {
    /// Parse a path. Both halves must be non-empty and separated by a single `#`.
    pub fn parse(path: &str) -> SchedResult<Self> {
        let (resource, action) = path
            .split_once('#')
            .ok_or_else(|| SchedError::InvalidPath(format!("{path} (must have #)")))?;

        if resource.is_empty() || action.is_empty() || action.contains('#') {
            return Err(SchedError::InvalidPath(path.to_string()));
        }

        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}

impl std::fmt::Display for JobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.resource, self.action)
    }
}

/// Persisted completion status. Only meaningful once `completed_at` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Error,
    Mia,
}

impl CompletionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Success => "success",
            CompletionStatus::Error => "error",
            CompletionStatus::Mia => "mia",
        }
    }
}

impl FromStr for CompletionStatus {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CompletionStatus::Success),
            "error" => Ok(CompletionStatus::Error),
            "mia" => Ok(CompletionStatus::Mia),
            other => Err(SchedError::Internal(format!(
                "unknown completion status: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a job.
///
/// Never stored: always derived from the persisted timestamps and status
/// with [`JobState::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to be claimed by a scheduler.
    Pending,
    /// Claimed; an employee is (or should be) executing it.
    Running,
    /// Finished and returned a result.
    Succeeded,
    /// Finished by raising an error.
    Failed,
    /// The employee vanished without recording completion.
    Mia,
    /// Cancel requested and the job has not completed.
    Cancelled,
}

impl JobState {
    /// Derive the state from persisted fields. Total over every combination.
    pub fn derive(
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        status: Option<CompletionStatus>,
    ) -> Self {
        if completed_at.is_some() {
            return match status {
                Some(CompletionStatus::Error) => JobState::Failed,
                Some(CompletionStatus::Mia) => JobState::Mia,
                // Finalization defaults a missing status to success.
                Some(CompletionStatus::Success) | None => JobState::Succeeded,
            };
        }
        if cancelled_at.is_some() {
            return JobState::Cancelled;
        }
        if started_at.is_some() {
            JobState::Running
        } else {
            JobState::Pending
        }
    }

    /// Check if the job has stopped moving on its own.
    ///
    /// Cancelled counts as terminal until the job is redone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Mia | JobState::Cancelled
        )
    }

    /// Check if execution has finalized (success, error or MIA).
    pub fn is_completed(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Mia)
    }

    /// Get a human-readable state name.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Mia => "MIA",
            JobState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Diagnostic captured from a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub class: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl JobError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }
}

impl From<&SchedError> for JobError {
    fn from(e: &SchedError) -> Self {
        JobError::new(e.class_name(), e.to_string())
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// Result of running a job's action, written in one finalizing update.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Error(JobError),
}

impl Outcome {
    pub fn status(&self) -> CompletionStatus {
        match self {
            Outcome::Success(_) => CompletionStatus::Success,
            Outcome::Error(_) => CompletionStatus::Error,
        }
    }
}

/// One unit of work as persisted in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// `"<resource>#<action>"`.
    pub path: String,

    /// Positional arguments handed to the action.
    pub args: Vec<Value>,

    /// Grouping key; `None` means ungrouped.
    pub batch_id: Option<String>,

    pub priority: Priority,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub status: Option<CompletionStatus>,
    pub result: Option<Value>,

    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub error_backtrace: Option<Vec<String>>,

    pub employee_host: Option<String>,
    pub employee_pid: Option<u32>,
}

impl Job {
    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        JobState::derive(
            self.started_at,
            self.completed_at,
            self.cancelled_at,
            self.status,
        )
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.state() == JobState::Succeeded
    }

    /// Whether an employee has reported its host and pid.
    pub fn is_assigned(&self) -> bool {
        self.employee_host.is_some() && self.employee_pid.is_some()
    }

    /// Wall time between claim and completion.
    pub fn time_taken(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    /// The recorded failure, if the job raised.
    pub fn error(&self) -> Option<JobError> {
        let class = self.error_class.clone()?;
        let message = self.error_message.clone().unwrap_or_default();
        Some(JobError {
            class,
            message,
            backtrace: self.error_backtrace.clone().unwrap_or_default(),
        })
    }

    /// Parsed form of [`Job::path`].
    pub fn job_path(&self) -> SchedResult<JobPath> {
        JobPath::parse(&self.path)
    }
}

/// A job to be inserted; the store assigns id and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub path: String,
    pub args: Vec<Value>,
    pub batch_id: Option<String>,
    pub priority: Priority,
}

impl NewJob {
    pub fn new(path: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            args,
            batch_id: None,
            priority: Priority::default(),
        }
    }

    /// Put the job in a batch.
    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Set the job priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Accept jobs in any of these states; empty accepts all.
    pub states: Vec<JobState>,

    /// Restrict to these ids.
    pub ids: Option<Vec<JobId>>,

    pub batch_id: Option<String>,

    pub path: Option<String>,

    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Create a filter for a set of states.
    pub fn in_states(states: impl IntoIterator<Item = JobState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Create a filter for pending jobs.
    pub fn pending() -> Self {
        Self::in_states([JobState::Pending])
    }

    /// Create a filter for running jobs.
    pub fn running() -> Self {
        Self::in_states([JobState::Running])
    }

    /// Create a filter for finalized jobs (success, error or MIA).
    pub fn completed() -> Self {
        Self::in_states([JobState::Succeeded, JobState::Failed, JobState::Mia])
    }

    /// Create a filter for cancelled, not yet completed jobs.
    pub fn cancelled() -> Self {
        Self::in_states([JobState::Cancelled])
    }

    /// Create a filter for jobs whose employee went missing.
    pub fn mia() -> Self {
        Self::in_states([JobState::Mia])
    }

    /// Create a filter for failed jobs.
    pub fn failed() -> Self {
        Self::in_states([JobState::Failed])
    }

    /// Create a filter for jobs that returned a result.
    pub fn succeeded() -> Self {
        Self::in_states([JobState::Succeeded])
    }

    /// Create a filter for every job in a batch.
    pub fn for_batch(batch_id: impl Into<String>) -> Self {
        Self::default().with_batch(batch_id)
    }

    /// Create a filter for a set of ids.
    pub fn for_ids(ids: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Limit results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a job matches this filter (ignores `limit`).
    pub fn matches(&self, job: &Job) -> bool {
        if !self.states.is_empty() && !self.states.contains(&job.state()) {
            return false;
        }

        if let Some(ref ids) = self.ids {
            if !ids.contains(&job.id) {
                return false;
            }
        }

        if let Some(ref batch_id) = self.batch_id {
            if job.batch_id.as_ref() != Some(batch_id) {
                return false;
            }
        }

        if let Some(ref path) = self.path {
            if &job.path != path {
                return false;
            }
        }

        true
    }
}
