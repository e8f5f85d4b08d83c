//! SQLite-based job store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::dequeue::{GroupStats, JobGroup};
use crate::error::{SchedError, SchedResult};
use crate::job::{CompletionStatus, Job, JobFilter, JobId, JobState, NewJob, Outcome, Priority};
use crate::persistence::JobStore;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "id, path, args, batch_id, priority, created_at, started_at, \
     completed_at, cancelled_at, status, result, error_class, error_message, error_backtrace, \
     employee_host, employee_pid";

const PENDING: &str = "started_at IS NULL AND cancelled_at IS NULL AND completed_at IS NULL";

const REDO_SQL: &str = "UPDATE jobs SET started_at = NULL, result = NULL, completed_at = NULL, \
     cancelled_at = NULL, status = NULL, error_class = NULL, error_message = NULL, \
     error_backtrace = NULL, employee_host = NULL, employee_pid = NULL";

/// SQLite-based job store.
///
/// One database file is shared by the boss and every employee process, so
/// the store runs in WAL mode with a busy timeout.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SchedResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create a new in-memory SQLite store.
    pub fn in_memory() -> SchedResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn lock(&self) -> SchedResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))
    }

    fn init_schema_sync(&self) -> SchedResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                args TEXT NOT NULL,
                batch_id TEXT,
                priority INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                cancelled_at TEXT,
                status TEXT,
                result TEXT,
                error_class TEXT,
                error_message TEXT,
                error_backtrace TEXT,
                employee_host TEXT,
                employee_pid INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_path ON jobs(path);
            CREATE INDEX IF NOT EXISTS idx_jobs_batch_id ON jobs(batch_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON jobs(started_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_cancelled_at ON jobs(cancelled_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_completed_at ON jobs(completed_at);
            "#,
        )?;
        Ok(())
    }
}

/// Fixed-width text so lexical order is chronological order.
fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_json<T: DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let time = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
        row.get::<_, Option<String>>(idx)?
            .map(|s| decode_time(idx, &s))
            .transpose()
    };

    let created_at: String = row.get(5)?;
    let status = row
        .get::<_, Option<String>>(9)?
        .map(|s| {
            s.parse::<CompletionStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))
            })
        })
        .transpose()?;
    let args: String = row.get(2)?;

    Ok(Job {
        id: JobId(row.get(0)?),
        path: row.get(1)?,
        args: decode_json(2, &args)?,
        batch_id: row.get(3)?,
        priority: Priority::new(row.get(4)?),
        created_at: decode_time(5, &created_at)?,
        started_at: time(6)?,
        completed_at: time(7)?,
        cancelled_at: time(8)?,
        status,
        result: row
            .get::<_, Option<String>>(10)?
            .map(|s| decode_json(10, &s))
            .transpose()?,
        error_class: row.get(11)?,
        error_message: row.get(12)?,
        error_backtrace: row
            .get::<_, Option<String>>(13)?
            .map(|s| decode_json(13, &s))
            .transpose()?,
        employee_host: row.get(14)?,
        employee_pid: row.get(15)?,
    })
}

/// SQL predicate matching exactly the jobs whose derived state is `state`.
fn state_predicate(state: JobState) -> &'static str {
    match state {
        JobState::Pending => PENDING,
        JobState::Running => {
            "started_at IS NOT NULL AND completed_at IS NULL AND cancelled_at IS NULL"
        }
        JobState::Succeeded => {
            "completed_at IS NOT NULL AND COALESCE(status, 'success') = 'success'"
        }
        JobState::Failed => "completed_at IS NOT NULL AND status = 'error'",
        JobState::Mia => "completed_at IS NOT NULL AND status = 'mia'",
        JobState::Cancelled => "completed_at IS NULL AND cancelled_at IS NOT NULL",
    }
}

/// Build the WHERE clause (without limit) for a filter.
fn filter_clause(filter: &JobFilter) -> (String, Vec<SqlValue>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params = Vec::new();

    if !filter.states.is_empty() {
        let predicates: Vec<_> = filter
            .states
            .iter()
            .map(|state| format!("({})", state_predicate(*state)))
            .collect();
        sql.push_str(&format!(" AND ({})", predicates.join(" OR ")));
    }

    if let Some(ref ids) = filter.ids {
        if ids.is_empty() {
            sql.push_str(" AND 0");
        } else {
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            params.extend(ids.iter().map(|id| SqlValue::Integer(id.0)));
        }
    }

    if let Some(ref batch_id) = filter.batch_id {
        sql.push_str(" AND batch_id = ?");
        params.push(SqlValue::Text(batch_id.clone()));
    }

    if let Some(ref path) = filter.path {
        sql.push_str(" AND path = ?");
        params.push(SqlValue::Text(path.clone()));
    }

    (sql, params)
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &NewJob) -> SchedResult<Job> {
        let conn = self.lock()?;
        let args = serde_json::to_string(&job.args)?;

        let inserted = conn.query_row(
            &format!(
                "INSERT INTO jobs (path, args, batch_id, priority, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {JOB_COLUMNS}"
            ),
            params![
                job.path,
                args,
                job.batch_id,
                job.priority.value(),
                encode_time(&Utc::now()),
            ],
            row_to_job,
        )?;

        Ok(inserted)
    }

    async fn load_job(&self, job_id: JobId) -> SchedResult<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.0],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let conn = self.lock()?;

        let (clause, mut params) = filter_clause(filter);
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs{clause} ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params_from_iter(params), row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    async fn count_jobs(&self, filter: &JobFilter) -> SchedResult<usize> {
        let conn = self.lock()?;

        let (clause, params) = filter_clause(filter);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs{clause}"),
            params_from_iter(params),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn claim_job(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET started_at = ?1 \
             WHERE id = ?2 AND started_at IS NULL AND cancelled_at IS NULL",
            params![encode_time(&at), job_id.0],
        )?;
        Ok(updated == 1)
    }

    async fn mark_employee(&self, job_id: JobId, host: &str, pid: u32) -> SchedResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET employee_host = ?1, employee_pid = ?2 WHERE id = ?3",
            params![host, pid, job_id.0],
        )?;
        if updated == 0 {
            return Err(SchedError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: JobId,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let (result, error_class, error_message, error_backtrace) = match outcome {
            Outcome::Success(value) => (Some(serde_json::to_string(value)?), None, None, None),
            Outcome::Error(error) => (
                None,
                Some(error.class.clone()),
                Some(error.message.clone()),
                Some(serde_json::to_string(&error.backtrace)?),
            ),
        };

        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, result = ?2, error_class = ?3, error_message = ?4, \
             error_backtrace = ?5, completed_at = ?6 \
             WHERE id = ?7 AND started_at IS NOT NULL AND completed_at IS NULL",
            params![
                outcome.status().as_str(),
                result,
                error_class,
                error_message,
                error_backtrace,
                encode_time(&at),
                job_id.0,
            ],
        )?;
        Ok(updated == 1)
    }

    async fn mark_mia(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, completed_at = ?2 \
             WHERE id = ?3 AND started_at IS NOT NULL AND completed_at IS NULL",
            params![
                CompletionStatus::Mia.as_str(),
                encode_time(&at),
                job_id.0
            ],
        )?;
        Ok(updated == 1)
    }

    async fn cancel(&self, job_id: JobId, at: DateTime<Utc>) -> SchedResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET cancelled_at = COALESCE(cancelled_at, ?1) WHERE id = ?2",
            params![encode_time(&at), job_id.0],
        )?;
        Ok(updated == 1)
    }

    async fn redo(&self, job_id: JobId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(&format!("{REDO_SQL} WHERE id = ?1"), params![job_id.0])?;
        Ok(updated == 1)
    }

    async fn redo_if_idle(&self, job_id: JobId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            &format!(
                "{REDO_SQL} WHERE id = ?1 \
                 AND (started_at IS NULL OR completed_at IS NOT NULL OR cancelled_at IS NOT NULL)"
            ),
            params![job_id.0],
        )?;
        Ok(updated == 1)
    }

    async fn pending_groups(&self) -> SchedResult<Vec<GroupStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT priority, path, batch_id, \
                    SUM(CASE WHEN completed_at IS NOT NULL THEN 1 ELSE 0 END), \
                    COUNT(*) \
             FROM jobs \
             GROUP BY priority, path, batch_id \
             HAVING SUM(CASE WHEN {PENDING} THEN 1 ELSE 0 END) > 0 \
             ORDER BY MIN(id)"
        ))?;

        let groups = stmt
            .query_map([], |row| {
                Ok(GroupStats {
                    group: JobGroup {
                        priority: Priority::new(row.get(0)?),
                        path: row.get(1)?,
                        batch_id: row.get(2)?,
                    },
                    completed: row.get::<_, i64>(3)? as u64,
                    total: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    async fn oldest_pending(&self, group: &JobGroup, limit: usize) -> SchedResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE priority = ?1 AND path = ?2 AND batch_id IS ?3 AND {PENDING} \
             ORDER BY id ASC LIMIT ?4"
        ))?;

        let jobs = stmt
            .query_map(
                params![
                    group.priority.value(),
                    group.path,
                    group.batch_id,
                    limit as i64
                ],
                row_to_job,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    async fn delete_completed_before(&self, before: DateTime<Utc>) -> SchedResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE completed_at IS NOT NULL AND completed_at < ?1",
            params![encode_time(&before)],
        )?;
        Ok(deleted)
    }
}
