//! Error handling for the job scheduler.

use thiserror::Error;

use crate::job::JobId;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug)]
pub enum SchedError {
    /// Job not found in the store.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Another scheduler claimed the job first.
    #[error("Job {0} was already claimed")]
    ClaimConflict(JobId),

    /// Job path is not of the form `<resource>#<action>` or names an
    /// unregistered resource.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Resource exists but does not expose the requested action.
    #[error("Invalid action: {resource} has no action {action}")]
    InvalidAction { resource: String, action: String },

    /// Invalid job state for the requested operation.
    #[error("Invalid job state for job {job_id}: expected {expected}, found {found}")]
    InvalidJobState {
        job_id: JobId,
        expected: String,
        found: String,
    },

    /// The job's action raised an error.
    #[error("Execution failure: {class}: {message}")]
    ExecutionFailure { class: String, message: String },

    /// The employee process disappeared without recording completion.
    #[error("Employee for job {job_id} (pid {pid}) vanished")]
    EmployeeVanished { job_id: JobId, pid: u32 },

    /// The job store could not be reached.
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    /// SQLite database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The employee could not persist its completion record.
    #[error("Failed to finalize job {job_id}: {message}")]
    FinalizationFailure { job_id: JobId, message: String },

    /// An employee process could not be started.
    #[error("Failed to spawn employee for job {job_id}: {message}")]
    SpawnFailed { job_id: JobId, message: String },

    /// Delivering a signal to a process failed.
    #[error("Failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    /// Timeout waiting for jobs to complete.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal scheduler error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedError {
    /// Whether the failure is worth retrying on the next poll rather than
    /// treated as a bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedError::StoreUnavailable(_) | SchedError::DatabaseError(_) | SchedError::IoError(_)
        )
    }

    /// Short class name recorded on a failed job.
    pub fn class_name(&self) -> &'static str {
        match self {
            SchedError::JobNotFound(_) => "JobNotFound",
            SchedError::ClaimConflict(_) => "ClaimConflict",
            SchedError::InvalidPath(_) => "InvalidPath",
            SchedError::InvalidAction { .. } => "InvalidAction",
            SchedError::InvalidJobState { .. } => "InvalidJobState",
            SchedError::ExecutionFailure { .. } => "ExecutionFailure",
            SchedError::EmployeeVanished { .. } => "EmployeeVanished",
            SchedError::StoreUnavailable(_) => "StoreUnavailable",
            SchedError::DatabaseError(_) => "DatabaseError",
            SchedError::FinalizationFailure { .. } => "FinalizationFailure",
            SchedError::SpawnFailed { .. } => "SpawnFailed",
            SchedError::Signal { .. } => "Signal",
            SchedError::Timeout(_) => "Timeout",
            SchedError::ConfigError(_) => "ConfigError",
            SchedError::IoError(_) => "IoError",
            SchedError::JsonError(_) => "JsonError",
            SchedError::Internal(_) => "Internal",
        }
    }
}

impl From<rusqlite::Error> for SchedError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                SchedError::StoreUnavailable(e.to_string())
            }
            other => SchedError::DatabaseError(other.to_string()),
        }
    }
}
