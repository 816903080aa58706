use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CipherdeskError, Result};
use crate::supervisor::launch::WorkerLaunch;

pub const ENV_DATA_DIR: &str = "CIPHERDESK_DATA_DIR";
pub const ENV_WORKER: &str = "CIPHERDESK_WORKER";

/// Name of the worker-written pid token inside the data directory.
pub const PID_TOKEN_FILE: &str = "pid";
pub const LOCK_FILE: &str = "cipherdesk.lock";
pub const CONFIG_FILE: &str = "config.yml";

/// Returns the per-user application data directory: `<data dir>/cipherdesk/`.
pub fn dirs_global() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cipherdesk")
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// First port tried by the allocator. Default: 4242.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// How many ports above `base_port` are scanned. Default: 1000.
    #[serde(default = "default_port_scan_limit")]
    pub port_scan_limit: u16,

    /// Heartbeat interval in seconds. Must exceed the longest worker call.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Per-call timeout in seconds. Default: ten hours.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Delay between connection attempts while the worker is starting.
    #[serde(default = "default_connect_retry")]
    pub connect_retry_ms: u64,

    /// How the worker executable is located.
    #[serde(default)]
    pub worker: WorkerLaunch,

    /// Per-user data directory holding the pid token and instance lock.
    #[serde(default = "dirs_global")]
    pub data_dir: PathBuf,

    /// Wait before the `--run-tests` smoke check inspects the worker.
    #[serde(default = "default_smoke_wait")]
    pub smoke_wait_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_port() -> u16 {
    4242
}
fn default_port_scan_limit() -> u16 {
    1000
}
fn default_heartbeat_interval() -> u64 {
    3600
}
fn default_call_timeout() -> u64 {
    36_000
}
fn default_connect_retry() -> u64 {
    250
}
fn default_smoke_wait() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            port_scan_limit: default_port_scan_limit(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            call_timeout_secs: default_call_timeout(),
            connect_retry_ms: default_connect_retry(),
            worker: WorkerLaunch::default(),
            data_dir: dirs_global(),
            smoke_wait_ms: default_smoke_wait(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load config from a YAML file. Returns default if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&contents).map_err(|e| CipherdeskError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load `config.yml` from the global data directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&dirs_global().join(CONFIG_FILE))
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(exe) = std::env::var_os(ENV_WORKER) {
            self.worker = WorkerLaunch::executable(PathBuf::from(exe));
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn pid_token_path(&self) -> PathBuf {
        self.data_dir.join(PID_TOKEN_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }
}
