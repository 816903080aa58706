//! Persistent client connection to the worker.
//!
//! A single actor task owns the TCP stream and the table of pending calls.
//! Callers talk to it over a channel, so every reply is routed by id to
//! exactly one waiting `invoke`.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::frame::{next_frame, Frame};
use super::{RpcInvoker, RpcReply};
use crate::config::AppConfig;
use crate::error::TransportError;
use crate::supervisor::WorkerWatch;

type ReplySender = oneshot::Sender<Result<RpcReply, TransportError>>;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub call_timeout: Duration,
    pub connect_retry: Duration,
}

impl BridgeConfig {
    /// Loopback endpoint on `port` with timings from the app config.
    pub fn for_port(port: u16, config: &AppConfig) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            heartbeat_interval: config.heartbeat_interval(),
            call_timeout: config.call_timeout(),
            connect_retry: config.connect_retry(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// Snapshot of the bridge's connection.
#[derive(Debug, Clone)]
pub struct RpcConnection {
    pub endpoint: SocketAddr,
    pub heartbeat_interval: Duration,
    pub call_timeout: Duration,
    pub state: ConnectionState,
}

enum Command {
    Call {
        id: u64,
        method: String,
        args: Vec<Value>,
        reply: ReplySender,
    },
    Notify {
        method: String,
        args: Vec<Value>,
    },
    Forget {
        id: u64,
    },
    Close,
}

pub struct RpcBridge {
    config: BridgeConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_id: AtomicU64,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RpcBridge {
    /// Start the connection actor. Returns immediately; calls issued before
    /// the worker is listening are queued until the connection comes up.
    pub fn connect(config: BridgeConfig) -> Self {
        Self::spawn(config, None)
    }

    /// Like `connect`, but tied to a supervised worker: once it has exited,
    /// pending, queued and new calls fail instead of waiting for a
    /// connection that will never come.
    pub fn connect_supervised(config: BridgeConfig, worker: WorkerWatch) -> Self {
        Self::spawn(config, Some(worker))
    }

    fn spawn(config: BridgeConfig, worker: Option<WorkerWatch>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let task = tokio::spawn(run_connection(config.clone(), rx, state_tx, worker));
        tracing::debug!(addr = %config.addr, "rpc bridge started");
        Self {
            config,
            commands,
            state,
            next_id: AtomicU64::new(1),
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    pub fn connection(&self) -> RpcConnection {
        RpcConnection {
            endpoint: self.config.addr,
            heartbeat_interval: self.config.heartbeat_interval,
            call_timeout: self.config.call_timeout,
            state: *self.state.borrow(),
        }
    }

    /// Wait until the connection is up, or fail after `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed)),
        )
        .await
        .map(|r| r.map(|s| *s));
        match reached {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Disconnected {
                reason: format!("not connected to {} after {:?}", self.config.addr, timeout),
            }),
        }
    }

    /// Shut the connection down. Pending calls fail with `Closed`.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[async_trait]
impl RpcInvoker for RpcBridge {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<RpcReply, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                id,
                method: method.to_owned(),
                args,
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        tracing::debug!(call_id = id, method, "rpc call issued");

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                let _ = self.commands.send(Command::Forget { id });
                Err(TransportError::TimedOut {
                    method: method.to_owned(),
                    timeout_secs: self.config.call_timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.commands
            .send(Command::Notify {
                method: method.to_owned(),
                args,
            })
            .map_err(|_| TransportError::Closed)
    }
}

async fn run_connection(
    config: BridgeConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    mut worker: Option<WorkerWatch>,
) {
    // Commands that arrived while no connection was available.
    let mut backlog: VecDeque<Command> = VecDeque::new();

    loop {
        let established = establish(&config, &mut commands, &mut backlog, &mut worker).await;
        let Some(stream) = established else {
            fail_backlog(&mut backlog, TransportError::Closed);
            let _ = state.send(ConnectionState::Closed);
            return;
        };
        let _ = state.send(ConnectionState::Connected);
        tracing::info!(addr = %config.addr, "connected to worker");

        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut pending: HashMap<u64, ReplySender> = HashMap::new();

        let mut outcome = Ok(());
        while let Some(command) = backlog.pop_front() {
            match submit(command, &mut writer, &mut pending).await {
                Ok(true) => {}
                Ok(false) => {
                    fail_pending(&mut pending, TransportError::Closed);
                    fail_backlog(&mut backlog, TransportError::Closed);
                    let _ = state.send(ConnectionState::Closed);
                    return;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let lost = match outcome {
            Err(e) => e,
            Ok(()) => {
                let served = serve(
                    &config,
                    &mut commands,
                    &mut lines,
                    &mut writer,
                    &mut pending,
                    &mut worker,
                )
                .await;
                match served {
                    Some(e) => e,
                    None => {
                        fail_pending(&mut pending, TransportError::Closed);
                        let _ = state.send(ConnectionState::Closed);
                        tracing::debug!("rpc bridge closed");
                        return;
                    }
                }
            }
        };

        tracing::warn!(
            addr = %config.addr,
            pending = pending.len(),
            "lost worker connection: {}",
            lost
        );
        fail_pending(&mut pending, lost);
        let _ = state.send(ConnectionState::Disconnected);
    }
}

/// Retry until connected. Returns `None` if the bridge is closed meanwhile.
///
/// While the supervised worker is known to have exited, no connection is
/// attempted and calls fail immediately.
async fn establish(
    config: &BridgeConfig,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    backlog: &mut VecDeque<Command>,
    worker: &mut Option<WorkerWatch>,
) -> Option<TcpStream> {
    loop {
        let exited = worker_exit(worker);
        match &exited {
            Some(e) => fail_backlog(backlog, e.clone()),
            None => match TcpStream::connect(config.addr).await {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    tracing::debug!(addr = %config.addr, "worker not reachable yet: {}", e);
                }
            },
        }

        let retry = tokio::time::sleep(config.connect_retry);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                _ = worker_changed(worker) => break,
                command = commands.recv() => match command {
                    None | Some(Command::Close) => return None,
                    Some(Command::Forget { id }) => {
                        backlog.retain(
                            |c| !matches!(c, Command::Call { id: queued, .. } if *queued == id),
                        );
                    }
                    Some(command) => match &exited {
                        Some(e) => reject(command, e.clone()),
                        None => backlog.push_back(command),
                    },
                },
            }
        }
    }
}

/// Drive one live connection. Returns the transport error that ended it, or
/// `None` when the bridge was closed.
async fn serve(
    config: &BridgeConfig,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    pending: &mut HashMap<u64, ReplySender>,
    worker: &mut Option<WorkerWatch>,
) -> Option<TransportError> {
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = next_frame(lines) => match frame {
                Ok(Some(frame)) => {
                    last_seen = Instant::now();
                    route(frame, pending);
                }
                Ok(None) => {
                    return Some(TransportError::Disconnected {
                        reason: "worker closed the connection".into(),
                    });
                }
                Err(e) => {
                    return Some(TransportError::Disconnected {
                        reason: e.to_string(),
                    });
                }
            },
            command = commands.recv() => {
                let Some(command) = command else {
                    return None;
                };
                match submit(command, writer, pending).await {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(e),
                }
            },
            _ = worker_changed(worker) => {
                if let Some(e) = worker_exit(worker) {
                    return Some(e);
                }
            },
            _ = heartbeat.tick() => {
                let silent = last_seen.elapsed();
                if silent >= config.heartbeat_interval * 2 {
                    return Some(TransportError::HeartbeatLapsed {
                        silent_secs: silent.as_secs(),
                    });
                }
                if let Err(e) = write_frame(writer, &Frame::Heartbeat).await {
                    return Some(e);
                }
            },
        }
    }
}

/// Apply one command to a live connection. `Ok(false)` means close.
async fn submit(
    command: Command,
    writer: &mut OwnedWriteHalf,
    pending: &mut HashMap<u64, ReplySender>,
) -> Result<bool, TransportError> {
    match command {
        Command::Call {
            id,
            method,
            args,
            reply,
        } => {
            pending.insert(id, reply);
            write_frame(writer, &Frame::Request { id, method, args }).await?;
        }
        Command::Notify { method, args } => {
            write_frame(writer, &Frame::Notify { method, args }).await?;
        }
        Command::Forget { id } => {
            pending.remove(&id);
        }
        Command::Close => return Ok(false),
    }
    Ok(true)
}

fn route(frame: Frame, pending: &mut HashMap<u64, ReplySender>) {
    let (id, result) = match frame {
        Frame::Response {
            id,
            success,
            payload,
        } => (id, RpcReply { success, payload }),
        Frame::Error { id, message } => (id, RpcReply::failed(message)),
        Frame::Heartbeat => return,
        Frame::Request { .. } | Frame::Notify { .. } => {
            tracing::debug!("ignoring client-bound frame from worker");
            return;
        }
    };
    match pending.remove(&id) {
        Some(sender) => {
            tracing::debug!(call_id = id, success = result.success, "rpc call completed");
            let _ = sender.send(Ok(result));
        }
        None => tracing::warn!(call_id = id, "reply for unknown call dropped"),
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), TransportError> {
    let line = frame.encode().map_err(|e| TransportError::Io {
        reason: format!("failed to encode frame: {}", e),
    })?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| TransportError::Disconnected {
            reason: format!("write failed: {}", e),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::Disconnected {
            reason: format!("flush failed: {}", e),
        })
}

fn fail_pending(pending: &mut HashMap<u64, ReplySender>, error: TransportError) {
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err(error.clone()));
    }
}

/// The transport error to report if the supervised worker has exited.
fn worker_exit(worker: &mut Option<WorkerWatch>) -> Option<TransportError> {
    let worker = worker.as_mut()?;
    let record = worker.borrow_and_update();
    let exited = record.as_ref().filter(|w| !w.is_running())?;
    Some(TransportError::Disconnected {
        reason: match exited.exit_code {
            Some(code) => format!("worker (pid {}) exited with code {}", exited.pid, code),
            None => format!("worker (pid {}) was terminated", exited.pid),
        },
    })
}

/// Resolves when the supervised worker's record changes. Never resolves
/// without a supervisor, or once the supervisor is gone.
async fn worker_changed(worker: &mut Option<WorkerWatch>) {
    match worker {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

fn reject(command: Command, error: TransportError) {
    match command {
        Command::Call { id, reply, .. } => {
            tracing::debug!(call_id = id, "rejecting call: {}", error);
            let _ = reply.send(Err(error));
        }
        Command::Notify { method, .. } => {
            tracing::debug!(method = %method, "dropping notification: {}", error);
        }
        Command::Forget { .. } | Command::Close => {}
    }
}

fn fail_backlog(backlog: &mut VecDeque<Command>, error: TransportError) {
    for command in backlog.drain(..) {
        if let Command::Call { reply, .. } = command {
            let _ = reply.send(Err(error.clone()));
        }
    }
}
