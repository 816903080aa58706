use std::path::PathBuf;
use std::sync::PoisonError;

use super::{ActiveSessions, FrontEnd, ProgressHandle, WorkflowKind, WorkflowState};
use crate::error::{CipherdeskError, Result};

/// Parameters collected from dialogs before the worker is called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionParams {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// One user-initiated operation, from dialog collection to a terminal state.
pub struct WorkflowSession {
    kind: WorkflowKind,
    params: SessionParams,
    state: WorkflowState,
    progress: Option<ProgressHandle>,
    slot: Option<SessionSlot>,
}

/// Frees the per-kind slot in the orchestrator when the session goes away.
struct SessionSlot {
    kind: WorkflowKind,
    active: ActiveSessions,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.kind);
    }
}

impl std::fmt::Debug for WorkflowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowSession")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish()
    }
}

impl WorkflowSession {
    /// A standalone session not tracked by any orchestrator.
    pub fn new(kind: WorkflowKind) -> Self {
        Self {
            kind,
            params: SessionParams::default(),
            state: WorkflowState::CollectingInput,
            progress: None,
            slot: None,
        }
    }

    pub(super) fn registered(kind: WorkflowKind, active: ActiveSessions) -> Self {
        let mut session = Self::new(kind);
        session.slot = Some(SessionSlot { kind, active });
        session
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn progress(&self) -> Option<ProgressHandle> {
        self.progress
    }

    /// Record the input chosen in the input dialog. May be repeated until
    /// the session is submitted.
    pub fn select_input(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        match self.state {
            WorkflowState::CollectingInput | WorkflowState::CollectingOutput => {
                self.params.input = Some(path.into());
                self.state = WorkflowState::CollectingOutput;
                Ok(())
            }
            _ => Err(self.invalid("select input")),
        }
    }

    /// Record the output directory. Requires an input first.
    pub fn select_output(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        match self.state {
            WorkflowState::CollectingOutput => {
                self.params.output = Some(path.into());
                Ok(())
            }
            _ => Err(self.invalid("select output")),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == WorkflowState::CollectingOutput
            && self.params.input.is_some()
            && self.params.output.is_some()
    }

    /// Input and output paths, if the session may be submitted.
    pub(super) fn submission(&self, expected: WorkflowKind) -> Result<(PathBuf, PathBuf)> {
        if self.kind != expected {
            return Err(self.invalid(match expected {
                WorkflowKind::Encrypt => "run encrypt",
                WorkflowKind::Decrypt => "run decrypt",
            }));
        }
        match (&self.params.input, &self.params.output) {
            (Some(input), Some(output)) if self.state == WorkflowState::CollectingOutput => {
                Ok((input.clone(), output.clone()))
            }
            _ => Err(self.invalid("submit")),
        }
    }

    pub(super) async fn advance(&mut self, next: WorkflowState, front_end: &dyn FrontEnd) {
        tracing::debug!(kind = %self.kind, from = %self.state, to = %next, "workflow transition");
        self.state = next;
        front_end.on_transition(self.kind, &self.state).await;
    }

    pub(super) fn set_progress(&mut self, handle: Option<ProgressHandle>) {
        self.progress = handle;
    }

    pub(super) fn take_progress(&mut self) -> Option<ProgressHandle> {
        self.progress.take()
    }

    fn invalid(&self, action: &'static str) -> CipherdeskError {
        CipherdeskError::InvalidTransition {
            kind: self.kind,
            action,
            state: self.state.to_string(),
        }
    }
}
