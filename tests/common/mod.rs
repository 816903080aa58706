//! Test doubles shared by integration tests: an in-process fake worker that
//! speaks the frame protocol, and shell-script worker executables.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cipherdesk::rpc::frame::{next_frame, Frame};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// What the fake worker does with one request.
#[derive(Clone)]
pub enum Reply {
    Respond(bool, Vec<Value>),
    After(Duration, bool, Vec<Value>),
    Error(String),
    /// Never answer.
    Silent,
    /// Drop the connection.
    Hangup,
}

pub type Handler = Arc<dyn Fn(&str, &[Value]) -> Reply + Send + Sync>;

pub struct FakeWorker {
    pub port: u16,
    pub calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    pub notifications: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    hangup: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl FakeWorker {
    /// Listen on an ephemeral port.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, Arc::new(handler), true)
    }

    /// Listen on a specific port.
    pub async fn start_on<F>(port: u16, handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::serve(listener, Arc::new(handler), true)
    }

    /// A worker that never answers heartbeats.
    pub async fn start_mute<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, Arc::new(handler), false)
    }

    fn serve(listener: TcpListener, handler: Handler, answer_heartbeats: bool) -> Self {
        let port = listener.local_addr().unwrap().port();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let (hangup, _) = broadcast::channel(4);

        let task = {
            let calls = calls.clone();
            let notifications = notifications.clone();
            let hangup = hangup.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    tokio::spawn(handle_connection(
                        stream,
                        handler.clone(),
                        calls.clone(),
                        notifications.clone(),
                        hangup.subscribe(),
                        answer_heartbeats,
                    ));
                }
            })
        };

        Self {
            port,
            calls,
            notifications,
            hangup,
            task,
        }
    }

    /// Drop every open connection, as if the worker process died.
    pub fn disconnect_all(&self) {
        let _ = self.hangup.send(());
    }

    pub fn call_methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..500 {
            if self.calls.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake worker never saw {} calls", count);
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.hangup.send(());
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    handler: Handler,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    notifications: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    mut hangup: broadcast::Receiver<()>,
    answer_heartbeats: bool,
) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(AsyncMutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let frame = tokio::select! {
            frame = next_frame(&mut lines) => frame,
            _ = hangup.recv() => return,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            _ => return,
        };
        match frame {
            Frame::Heartbeat => {
                if answer_heartbeats {
                    send(&writer, &Frame::Heartbeat).await;
                }
            }
            Frame::Notify { method, args } => {
                notifications.lock().unwrap().push((method, args));
            }
            Frame::Request { id, method, args } => {
                calls.lock().unwrap().push((method.clone(), args.clone()));
                match handler(&method, &args) {
                    Reply::Respond(success, payload) => {
                        send(&writer, &Frame::Response { id, success, payload }).await;
                    }
                    Reply::After(delay, success, payload) => {
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            send(&writer, &Frame::Response { id, success, payload }).await;
                        });
                    }
                    Reply::Error(message) => {
                        send(&writer, &Frame::Error { id, message }).await;
                    }
                    Reply::Silent => {}
                    Reply::Hangup => return,
                }
            }
            Frame::Response { .. } | Frame::Error { .. } => {}
        }
    }
}

async fn send(writer: &Arc<AsyncMutex<OwnedWriteHalf>>, frame: &Frame) {
    let line = frame.encode().unwrap();
    let mut writer = writer.lock().await;
    let _ = writer.write_all(line.as_bytes()).await;
    let _ = writer.flush().await;
}

/// Write an executable `#!/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll until `path` exists with non-empty contents.
pub async fn wait_for_file(path: &Path) -> String {
    for _ in 0..300 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if !contents.trim().is_empty() {
                return contents.trim().to_string();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never appeared", path.display());
}
