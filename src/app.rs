//! Application context: wires the guard, port, worker, bridge and
//! orchestrator together and owns them for the life of the process.
//!
//! Ownership is single-writer per resource: the supervisor alone mutates
//! worker state, the bridge actor alone mutates connection state.

use std::sync::Arc;

use crate::cancel::{ProcessKillCanceller, SigtermSignaller};
use crate::config::AppConfig;
use crate::error::{CipherdeskError, Result};
use crate::instance::InstanceGuard;
use crate::port::PortAllocator;
use crate::rpc::{BridgeConfig, RpcBridge, WorkerApi};
use crate::supervisor::WorkerSupervisor;
use crate::workflow::{FrontEnd, Orchestrator};

pub const APP_TITLE: &str = "cipherdesk";
pub const ALREADY_RUNNING_MESSAGE: &str = "cipherdesk is already running.";

pub enum Launch {
    Started(App),
    /// Another instance holds the lock. Nothing was allocated or spawned.
    SecondInstance,
}

pub struct App {
    config: AppConfig,
    guard: Option<InstanceGuard>,
    port: u16,
    supervisor: Arc<WorkerSupervisor>,
    bridge: Arc<RpcBridge>,
    orchestrator: Orchestrator,
}

impl App {
    /// Guard, then port, then worker, then bridge. Allocation and spawn
    /// failures are returned as fatal startup errors.
    pub async fn launch(config: AppConfig, front_end: Arc<dyn FrontEnd>) -> Result<Launch> {
        let guard = match InstanceGuard::acquire(&config.lock_path()) {
            Ok(guard) => guard,
            Err(CipherdeskError::AlreadyRunning { path }) => {
                tracing::warn!(lock = %path.display(), "second instance; exiting");
                front_end.notify(APP_TITLE, ALREADY_RUNNING_MESSAGE).await;
                return Ok(Launch::SecondInstance);
            }
            Err(e) => return Err(e),
        };

        let port = PortAllocator::new(config.base_port, config.port_scan_limit).allocate()?;

        let supervisor = Arc::new(WorkerSupervisor::new(config.worker.clone()));
        supervisor.start(port).await?;

        let bridge = Arc::new(RpcBridge::connect_supervised(
            BridgeConfig::for_port(port, &config),
            supervisor.watch(),
        ));
        let canceller = Arc::new(ProcessKillCanceller::new(
            config.pid_token_path(),
            supervisor.clone(),
            Arc::new(SigtermSignaller),
        ));
        let orchestrator = Orchestrator::new(WorkerApi::new(bridge.clone()), front_end, canceller);

        tracing::info!(port, data_dir = %config.data_dir.display(), "application ready");
        Ok(Launch::Started(Self {
            config,
            guard: Some(guard),
            port,
            supervisor,
            bridge,
            orchestrator,
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn bridge(&self) -> &RpcBridge {
        &self.bridge
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Close the bridge, stop the worker, release the instance lock.
    pub async fn shutdown(mut self) -> Result<()> {
        self.bridge.close().await;
        let stopped = self.supervisor.stop().await;
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
        stopped
    }
}
