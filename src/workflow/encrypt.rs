use std::path::Path;

use super::{ConfirmOptions, Orchestrator, WorkflowKind, WorkflowOutcome, WorkflowSession};
use crate::error::Result;
use crate::rpc::methods::ENCRYPT;

impl Orchestrator {
    /// Confirm, then run `encrypt(input, output)` with a progress surface up.
    ///
    /// While the call is outstanding, `cancel(WorkflowKind::Encrypt)` makes
    /// this workflow kill the worker through the canceller; the transport
    /// failure that follows resolves the session as `Cancelled`.
    pub async fn run_encrypt(
        &self,
        mut session: WorkflowSession,
        options: ConfirmOptions,
    ) -> Result<WorkflowOutcome> {
        let (input, output) = session.submission(WorkflowKind::Encrypt)?;

        if !self.confirm(&mut session, &options).await {
            return Ok(self.finish(session, WorkflowOutcome::Declined).await);
        }

        let mut cancel_rx = self.arm_cancellation(WorkflowKind::Encrypt);
        self.start_progress(&mut session).await;

        let mut cancel_requested = false;
        let result = {
            let call = self.api.encrypt(&input, &output);
            tokio::pin!(call);
            loop {
                tokio::select! {
                    result = &mut call => break result,
                    Some(()) = cancel_rx.recv(), if !cancel_requested => {
                        match self.canceller.cancel(&session).await {
                            Ok(pid) => {
                                tracing::info!(pid, "encrypt cancellation requested");
                                cancel_requested = true;
                            }
                            Err(e) => {
                                tracing::warn!("encrypt cancellation failed: {}", e);
                                self.front_end.cancel_failed(WorkflowKind::Encrypt, &e).await;
                            }
                        }
                    }
                }
            }
        };

        let outcome = match result {
            Ok(reply) => match reply.into_result(ENCRYPT) {
                Ok(reply) => {
                    let artifact = reply.message().map(str::to_owned);
                    if let Some(path) = artifact.as_deref().filter(|p| !p.is_empty()) {
                        self.front_end.reveal_in_folder(Path::new(path)).await;
                    }
                    WorkflowOutcome::Done { artifact }
                }
                Err(e) => WorkflowOutcome::failed(e),
            },
            Err(e) if cancel_requested => {
                tracing::debug!("encrypt call ended after cancellation: {}", e);
                WorkflowOutcome::Cancelled
            }
            Err(e) => WorkflowOutcome::failed(e.into()),
        };
        Ok(self.finish(session, outcome).await)
    }
}
