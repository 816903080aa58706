use std::path::PathBuf;

use crate::workflow::WorkflowKind;

#[derive(Debug, thiserror::Error)]
pub enum CipherdeskError {
    #[error("no free port on 127.0.0.1 after scanning {attempts} ports from {base}")]
    Allocation { base: u16, attempts: u16 },

    #[error("worker executable not found at {path}")]
    WorkerNotFound { path: PathBuf },

    #[error("failed to spawn worker: {reason}")]
    Spawn { reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("worker reported failure: {message}")]
    LogicalFailure { message: String },

    #[error("another instance is already running (lock held at {path})")]
    AlreadyRunning { path: PathBuf },

    #[error("cancellation failed: {reason}")]
    Cancel { reason: String },

    #[error("stale pid token: token names {token_pid}, current worker is {current_pid:?}")]
    StaleToken {
        token_pid: u32,
        current_pid: Option<u32>,
    },

    #[error("{kind} workflow cannot be cancelled")]
    NotCancellable { kind: WorkflowKind },

    #[error("a {kind} session is already active")]
    SessionActive { kind: WorkflowKind },

    #[error("invalid {kind} transition: cannot {action} while {state}")]
    InvalidTransition {
        kind: WorkflowKind,
        action: &'static str,
        state: String,
    },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the RPC channel itself, as opposed to a worker-reported
/// `success = false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("bridge closed")]
    Closed,

    #[error("connection to worker dropped: {reason}")]
    Disconnected { reason: String },

    #[error("worker heartbeat lapsed after {silent_secs}s of silence")]
    HeartbeatLapsed { silent_secs: u64 },

    #[error("call `{method}` timed out after {timeout_secs}s")]
    TimedOut { method: String, timeout_secs: u64 },

    #[error("io error: {reason}")]
    Io { reason: String },
}

pub type Result<T> = std::result::Result<T, CipherdeskError>;
