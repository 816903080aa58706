use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CipherdeskError, Result};

const DEFAULT_WORKER_DIR: &str = "crypto_gui";
const DEFAULT_WORKER_NAME: &str = "crypto_gui";

/// Worker launch strategy, fixed by configuration at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum WorkerLaunch {
    /// Precompiled worker bundled next to the application.
    /// The platform executable suffix is appended to `name`.
    #[serde(rename = "packaged")]
    Packaged { dir: PathBuf, name: String },

    /// Interpreted worker script run through an interpreter.
    #[serde(rename = "development")]
    Development {
        interpreter: PathBuf,
        script: PathBuf,
    },

    /// An explicit worker executable path.
    #[serde(rename = "binary")]
    Binary { path: PathBuf },
}

impl Default for WorkerLaunch {
    fn default() -> Self {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::Packaged {
            dir: base.join(DEFAULT_WORKER_DIR),
            name: DEFAULT_WORKER_NAME.into(),
        }
    }
}

/// Program and leading arguments; the supervisor appends the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorker {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerLaunch {
    pub fn executable(path: PathBuf) -> Self {
        Self::Binary { path }
    }

    /// Resolve the program to spawn. The worker file itself must exist; the
    /// interpreter in development mode is looked up on `PATH` by the OS.
    pub fn resolve(&self) -> Result<ResolvedWorker> {
        match self {
            Self::Packaged { dir, name } => {
                let path = dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
                require_file(&path)?;
                Ok(ResolvedWorker {
                    program: path,
                    args: Vec::new(),
                })
            }
            Self::Development {
                interpreter,
                script,
            } => {
                require_file(script)?;
                Ok(ResolvedWorker {
                    program: interpreter.clone(),
                    args: vec![script.display().to_string()],
                })
            }
            Self::Binary { path } => {
                require_file(path)?;
                Ok(ResolvedWorker {
                    program: path.clone(),
                    args: Vec::new(),
                })
            }
        }
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CipherdeskError::WorkerNotFound {
            path: path.to_path_buf(),
        })
    }
}
