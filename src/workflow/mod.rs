//! User-facing encrypt/decrypt workflows as explicit state machines layered
//! over worker calls.

pub mod decrypt;
pub mod encrypt;
pub mod session;

pub use decrypt::{DecryptRequest, TITLE_PLACEHOLDER};
pub use session::{SessionParams, WorkflowSession};

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cancel::Canceller;
use crate::error::{CipherdeskError, Result};
use crate::rpc::WorkerApi;

/// Index of the affirmative (first, default) confirmation button.
pub const AFFIRMATIVE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Encrypt,
    Decrypt,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => write!(f, "encrypt"),
            Self::Decrypt => write!(f, "decrypt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    CollectingInput,
    CollectingOutput,
    ResolvingTitle,
    Confirming,
    Running,
    Done,
    Error,
    Cancelled,
    /// Confirmation declined; back to idle with no call issued.
    Declined,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::Cancelled | Self::Declined
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CollectingInput => "collecting input",
            Self::CollectingOutput => "collecting output",
            Self::ResolvingTitle => "resolving title",
            Self::Confirming => "confirming",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Declined => "declined",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// `artifact` is the path reported by the worker, when it reports one.
    Done { artifact: Option<String> },
    Error { message: String },
    Cancelled,
    Declined,
}

impl WorkflowOutcome {
    /// Worker-reported failures keep their message verbatim.
    pub fn failed(error: CipherdeskError) -> Self {
        match error {
            CipherdeskError::LogicalFailure { message } => Self::Error { message },
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }

    fn state(&self) -> WorkflowState {
        match self {
            Self::Done { .. } => WorkflowState::Done,
            Self::Error { .. } => WorkflowState::Error,
            Self::Cancelled => WorkflowState::Cancelled,
            Self::Declined => WorkflowState::Declined,
        }
    }
}

/// Content of a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOptions {
    pub title: String,
    pub message: String,
    pub buttons: Vec<String>,
    #[serde(default)]
    pub default_id: usize,
}

impl ConfirmOptions {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            buttons: vec!["Continue".into(), "Cancel".into()],
            default_id: AFFIRMATIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressHandle(pub u64);

/// The window/dialog layer. It observes transitions and answers prompts;
/// it never drives the worker directly.
#[async_trait]
pub trait FrontEnd: Send + Sync {
    async fn on_transition(&self, _kind: WorkflowKind, _state: &WorkflowState) {}

    /// Show a confirmation prompt and return the index of the chosen button.
    async fn confirm(&self, options: &ConfirmOptions) -> usize;

    async fn show_progress(&self, kind: WorkflowKind) -> ProgressHandle;

    async fn close_progress(&self, handle: ProgressHandle);

    async fn reveal_in_folder(&self, _path: &Path) {}

    async fn cancel_failed(&self, _kind: WorkflowKind, _error: &CipherdeskError) {}

    /// System notification outside any workflow.
    async fn notify(&self, title: &str, message: &str);
}

type ActiveSessions = Arc<Mutex<HashMap<WorkflowKind, Option<mpsc::Sender<()>>>>>;

/// Runs workflow sessions against the shared worker.
pub struct Orchestrator {
    api: WorkerApi,
    front_end: Arc<dyn FrontEnd>,
    canceller: Arc<dyn Canceller>,
    active: ActiveSessions,
}

impl Orchestrator {
    pub fn new(
        api: WorkerApi,
        front_end: Arc<dyn FrontEnd>,
        canceller: Arc<dyn Canceller>,
    ) -> Self {
        Self {
            api,
            front_end,
            canceller,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn api(&self) -> &WorkerApi {
        &self.api
    }

    /// Start a session. At most one session per kind is active at a time;
    /// the slot is released when the session is dropped.
    pub fn begin(&self, kind: WorkflowKind) -> Result<WorkflowSession> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&kind) {
            return Err(CipherdeskError::SessionActive { kind });
        }
        active.insert(kind, None);
        Ok(WorkflowSession::registered(kind, Arc::clone(&self.active)))
    }

    /// Request cancellation of the running session of `kind`.
    ///
    /// Only encrypt is cancellable. The request is delivered to the running
    /// workflow, which signals the worker itself.
    pub fn cancel(&self, kind: WorkflowKind) -> Result<()> {
        if kind == WorkflowKind::Decrypt {
            return Err(CipherdeskError::NotCancellable { kind });
        }
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(Some(sender)) = active.get(&kind) else {
            return Err(CipherdeskError::Cancel {
                reason: format!("no running {} session", kind),
            });
        };
        match sender.try_send(()) {
            // A full channel means a request is already queued.
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CipherdeskError::Cancel {
                reason: format!("{} session already finished", kind),
            }),
        }
    }

    fn arm_cancellation(&self, kind: WorkflowKind) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = active.get_mut(&kind) {
            *slot = Some(tx);
        }
        rx
    }

    /// Show the prompt; true only for the affirmative button.
    async fn confirm(&self, session: &mut WorkflowSession, options: &ConfirmOptions) -> bool {
        session.advance(WorkflowState::Confirming, self.front_end.as_ref()).await;
        let response = self.front_end.confirm(options).await;
        if response == AFFIRMATIVE {
            return true;
        }
        tracing::info!(kind = %session.kind(), response, "confirmation declined");
        false
    }

    async fn start_progress(&self, session: &mut WorkflowSession) {
        session.advance(WorkflowState::Running, self.front_end.as_ref()).await;
        let handle = self.front_end.show_progress(session.kind()).await;
        session.set_progress(Some(handle));
    }

    async fn finish(
        &self,
        mut session: WorkflowSession,
        outcome: WorkflowOutcome,
    ) -> WorkflowOutcome {
        if let Some(handle) = session.take_progress() {
            self.front_end.close_progress(handle).await;
        }
        session.advance(outcome.state(), self.front_end.as_ref()).await;
        tracing::info!(kind = %session.kind(), outcome = ?outcome, "workflow finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(WorkflowState::Done.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(WorkflowState::Declined.is_terminal());
        assert!(!WorkflowState::Running.is_terminal());
        assert!(!WorkflowState::ResolvingTitle.is_terminal());
    }

    #[test]
    fn confirm_options_default_to_affirmative() {
        let options = ConfirmOptions::new("Encrypt", "Encrypt this folder?");
        assert_eq!(options.default_id, AFFIRMATIVE);
        assert_eq!(options.buttons.len(), 2);
    }
}
