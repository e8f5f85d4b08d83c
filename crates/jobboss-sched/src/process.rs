//! OS process control for employees.
//!
//! The boss only ever needs three primitives: spawn a detached employee for a
//! job, send it a termination signal, and probe whether its pid still exists.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tracing::{debug, warn};

use crate::error::{SchedError, SchedResult};
use crate::job::JobId;

/// Process-control seam used by the dispatcher and the boss.
pub trait ProcessControl: Send + Sync {
    /// Start a detached employee for `job_id` and return its pid.
    fn spawn_employee(&self, job_id: JobId) -> SchedResult<u32>;

    /// Ask a process to terminate. A process that is already gone is not an error.
    fn terminate(&self, pid: u32) -> SchedResult<()>;

    /// Non-destructive existence check.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Spawns employees as `<program> <args..> --job <id>`.
///
/// Must be used from within a tokio runtime: each child is reaped by a
/// background task so an exited employee never lingers as a zombie that
/// would still answer liveness probes.
#[derive(Debug, Clone)]
pub struct OsProcessControl {
    program: PathBuf,
    args: Vec<OsString>,
}

impl OsProcessControl {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-invoke the running executable with the given leading arguments.
    pub fn current_exe<I, S>(args: I) -> SchedResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

impl ProcessControl for OsProcessControl {
    fn spawn_employee(&self, job_id: JobId) -> SchedResult<u32> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--job")
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .process_group(0);

        let spawn_failed = |message: String| SchedError::SpawnFailed { job_id, message };

        let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_failed("employee exited before reporting a pid".to_string()))?;

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(job_id = %job_id, pid, %status, "Employee exited"),
                Err(e) => warn!(job_id = %job_id, pid, error = %e, "Failed to reap employee"),
            }
        });

        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> SchedResult<()> {
        let raw = to_pid(pid).ok_or_else(|| SchedError::Signal {
            pid,
            message: "invalid pid".to_string(),
        })?;

        // Safety: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(SchedError::Signal {
                pid,
                message: err.to_string(),
            })
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        is_alive(pid)
    }
}

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Probe a pid with signal 0. `EPERM` means it exists under another user.
pub fn is_alive(pid: u32) -> bool {
    let Some(raw) = to_pid(pid) else {
        return false;
    };

    // Safety: signal 0 performs error checking only.
    let rc = unsafe { libc::kill(raw, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Name of the host this process runs on.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];

    // Safety: the buffer is valid for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }

    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Lower this process's scheduling priority. Best effort.
pub fn lower_priority(niceness: i32) {
    // Safety: setpriority(2) on the calling process.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, niceness) };
    if rc != 0 {
        debug!(
            niceness,
            error = %io::Error::last_os_error(),
            "Could not lower employee priority"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn test_hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        // `sh -c 'sleep 30' sh --job <id>`: trailing args become positional.
        let control = OsProcessControl::new("sh", ["-c", "sleep 30", "sh"]);
        let pid = control.spawn_employee(JobId(1)).unwrap();
        assert!(control.is_alive(pid));

        control.terminate(pid).unwrap();

        let mut alive = true;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if !control.is_alive(pid) {
                alive = false;
                break;
            }
        }
        assert!(!alive, "employee should be reaped after SIGTERM");

        // Signalling a vanished pid is not an error.
        control.terminate(pid).unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let control = OsProcessControl::new("/nonexistent/jobboss-employee", Vec::<String>::new());
        let err = control.spawn_employee(JobId(3)).unwrap_err();
        assert!(matches!(err, SchedError::SpawnFailed { job_id: JobId(3), .. }));
    }
}
