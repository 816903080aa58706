pub mod launch;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{CipherdeskError, Result};
use launch::WorkerLaunch;

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Exited,
}

/// Observable record of the (single) worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProcess {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub state: WorkerState,
    pub exit_code: Option<i32>,
}

impl WorkerProcess {
    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }
}

/// Latest worker record as published by the supervisor. `None` until the
/// first worker is started.
pub type WorkerWatch = watch::Receiver<Option<WorkerProcess>>;

/// Handle on the task that owns the child process.
struct Monitor {
    kill: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Owns the external worker process: spawn, observe, terminate.
///
/// At most one worker is alive at a time. A monitor task owns the child and
/// publishes its exit, so observers learn of a crash without polling. A
/// crashed worker is never respawned here.
pub struct WorkerSupervisor {
    launch: WorkerLaunch,
    monitor: Mutex<Option<Monitor>>,
    record: Arc<watch::Sender<Option<WorkerProcess>>>,
}

impl WorkerSupervisor {
    pub fn new(launch: WorkerLaunch) -> Self {
        let (record, _) = watch::channel(None);
        Self {
            launch,
            monitor: Mutex::new(None),
            record: Arc::new(record),
        }
    }

    /// Spawn the worker with `port` as its sole argument.
    pub async fn start(&self, port: u16) -> Result<WorkerProcess> {
        let mut monitor = self.monitor.lock().await;
        let running = self
            .record
            .borrow()
            .as_ref()
            .filter(|w| w.is_running())
            .map(|w| w.pid);
        if let Some(pid) = running {
            return Err(CipherdeskError::Spawn {
                reason: format!("worker already running with pid {}", pid),
            });
        }

        let resolved = self.launch.resolve()?;
        let mut args = resolved.args;
        args.push(port.to_string());

        let mut command = Command::new(&resolved.program);
        command.args(&args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        // Own process group: a terminal Ctrl+C reaches us, not the worker.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| CipherdeskError::Spawn {
            reason: format!("{}: {}", resolved.program.display(), e),
        })?;
        let pid = child.id().ok_or_else(|| CipherdeskError::Spawn {
            reason: "worker exited before its pid could be read".into(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        let info = WorkerProcess {
            executable: resolved.program,
            args,
            pid,
            started_at: Utc::now(),
            state: WorkerState::Running,
            exit_code: None,
        };
        tracing::info!(
            pid,
            port,
            executable = %info.executable.display(),
            "worker started"
        );

        self.record.send_replace(Some(info.clone()));
        let (kill, kill_rx) = oneshot::channel();
        let task = tokio::spawn(watch_exit(child, pid, kill_rx, self.record.clone()));
        *monitor = Some(Monitor {
            kill: Some(kill),
            task,
        });
        Ok(info)
    }

    /// Terminate the worker. Calling this with no live worker is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        let Some(mut current) = monitor.take() else {
            return Ok(());
        };
        let was_running = self.is_running().await;
        if let Some(kill) = current.kill.take() {
            let _ = kill.send(());
        }
        if let Err(e) = current.task.await {
            tracing::warn!("worker monitor failed: {}", e);
        }
        if was_running {
            if let Some(worker) = self.status().await {
                tracing::info!(pid = worker.pid, exit_code = ?worker.exit_code, "worker stopped");
            }
        }
        Ok(())
    }

    /// Current worker record.
    pub async fn status(&self) -> Option<WorkerProcess> {
        self.record.borrow().clone()
    }

    /// Pid and start time of the live worker, if any.
    pub async fn current(&self) -> Option<(u32, DateTime<Utc>)> {
        self.status()
            .await
            .filter(WorkerProcess::is_running)
            .map(|w| (w.pid, w.started_at))
    }

    pub async fn is_running(&self) -> bool {
        self.current().await.is_some()
    }

    /// Subscribe to worker starts and exits.
    pub fn watch(&self) -> WorkerWatch {
        self.record.subscribe()
    }
}

/// Wait for the child to exit, or kill it when asked (or when the
/// supervisor goes away), then publish the exit.
async fn watch_exit(
    mut child: Child,
    pid: u32,
    kill: oneshot::Receiver<()>,
    record: Arc<watch::Sender<Option<WorkerProcess>>>,
) {
    let mut killed = false;
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            killed = true;
            if let Err(e) = child.start_kill() {
                tracing::warn!(pid, "failed to signal worker: {}", e);
            }
            child.wait().await
        }
    };
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(pid, "failed to wait for worker: {}", e);
            None
        }
    };
    if !killed {
        tracing::warn!(pid, exit_code = ?exit_code, "worker exited");
    }

    record.send_modify(|current| {
        if let Some(worker) = current.as_mut().filter(|w| w.pid == pid) {
            worker.state = WorkerState::Exited;
            worker.exit_code = exit_code;
        }
    });
}

async fn forward_output<R>(stream: R, pid: u32, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(target: "cipherdesk::worker", pid, stream = name, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(pid, stream = name, "worker output closed: {}", e);
                break;
            }
        }
    }
}
