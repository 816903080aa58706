//! Out-of-band cancellation: the worker has no cancel message, so a running
//! call is aborted by signalling the worker process named in its pid token.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CipherdeskError, Result};
use crate::supervisor::WorkerSupervisor;
use crate::workflow::WorkflowSession;

/// Filesystem mtimes may be coarser than the worker's recorded start time,
/// so a token is still fresh if written this long before it.
const TOKEN_MTIME_SLACK_SECS: i64 = 2;

/// Contents of the worker-written `pid` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidToken {
    pub pid: u32,
    pub written_at: Option<DateTime<Utc>>,
}

impl PidToken {
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CipherdeskError::Cancel {
            reason: format!("cannot read pid token {}: {}", path.display(), e),
        })?;
        let pid = contents
            .trim()
            .parse::<u32>()
            .map_err(|e| CipherdeskError::Cancel {
                reason: format!("malformed pid token {:?}: {}", contents.trim(), e),
            })?;
        let written_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Ok(Self { pid, written_at })
    }
}

/// Identity of the worker that is current right now.
#[async_trait]
pub trait WorkerIdentity: Send + Sync {
    /// Pid and start time of the live worker, `None` if none is running.
    async fn current_worker(&self) -> Option<(u32, DateTime<Utc>)>;
}

#[async_trait]
impl WorkerIdentity for WorkerSupervisor {
    async fn current_worker(&self) -> Option<(u32, DateTime<Utc>)> {
        self.current().await
    }
}

/// Delivers a termination signal to a process.
pub trait Signaller: Send + Sync {
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Sends SIGTERM.
pub struct SigtermSignaller;

impl Signaller for SigtermSignaller {
    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<()> {
        // kill(2) treats 0 and negative pids as process groups.
        let raw = libc::pid_t::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| CipherdeskError::Cancel {
                reason: format!("refusing to signal pid {}", pid),
            })?;
        let ret = unsafe { libc::kill(raw, libc::SIGTERM) };
        if ret != 0 {
            return Err(CipherdeskError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) -> Result<()> {
        Err(CipherdeskError::Cancel {
            reason: format!("signalling pid {} is not supported on this platform", pid),
        })
    }
}

/// Cancels a running workflow session.
#[async_trait]
pub trait Canceller: Send + Sync {
    /// Abort the session's outstanding call. Returns the pid signalled.
    async fn cancel(&self, session: &WorkflowSession) -> Result<u32>;
}

/// Kills the worker named by the pid token, after checking that the token
/// belongs to the current worker and not to a previous run.
pub struct ProcessKillCanceller {
    token_path: PathBuf,
    identity: Arc<dyn WorkerIdentity>,
    signaller: Arc<dyn Signaller>,
}

impl ProcessKillCanceller {
    pub fn new(
        token_path: PathBuf,
        identity: Arc<dyn WorkerIdentity>,
        signaller: Arc<dyn Signaller>,
    ) -> Self {
        Self {
            token_path,
            identity,
            signaller,
        }
    }
}

#[async_trait]
impl Canceller for ProcessKillCanceller {
    async fn cancel(&self, session: &WorkflowSession) -> Result<u32> {
        let token = PidToken::read(&self.token_path)?;
        let Some((current_pid, started_at)) = self.identity.current_worker().await else {
            return Err(CipherdeskError::StaleToken {
                token_pid: token.pid,
                current_pid: None,
            });
        };

        // The worker may run the operation in a child of the spawned process,
        // so a token written during this worker's lifetime is also accepted.
        let earliest = started_at - chrono::Duration::seconds(TOKEN_MTIME_SLACK_SECS);
        let fresh = token.pid == current_pid
            || token.written_at.is_some_and(|written| written >= earliest);
        if !fresh {
            return Err(CipherdeskError::StaleToken {
                token_pid: token.pid,
                current_pid: Some(current_pid),
            });
        }

        self.signaller.terminate(token.pid)?;
        tracing::info!(
            pid = token.pid,
            kind = %session.kind(),
            "sent termination signal to worker"
        );
        Ok(token.pid)
    }
}
