use super::{
    ConfirmOptions, Orchestrator, WorkflowKind, WorkflowOutcome, WorkflowSession, WorkflowState,
};
use crate::error::Result;
use crate::rpc::methods::DECRYPT;

/// Placeholder in the confirmation message replaced by the dataset title.
pub const TITLE_PLACEHOLDER: &str = "$1";

/// Decrypt-specific options beyond the dialog-collected paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRequest {
    pub dataset_id: String,
    pub url: String,
    pub options: ConfirmOptions,
}

impl Orchestrator {
    /// Resolve the dataset title for the prompt, confirm, then run
    /// `decrypt(input, output, url)`.
    ///
    /// Title resolution is cosmetic: any failure leaves the message as is.
    /// Decrypt has no cancellation path.
    pub async fn run_decrypt(
        &self,
        mut session: WorkflowSession,
        request: DecryptRequest,
    ) -> Result<WorkflowOutcome> {
        let (input, output) = session.submission(WorkflowKind::Decrypt)?;
        let DecryptRequest {
            dataset_id,
            url,
            mut options,
        } = request;

        session
            .advance(WorkflowState::ResolvingTitle, self.front_end.as_ref())
            .await;
        match self.api.get_dataset_title(&dataset_id).await {
            Ok(Some(title)) => {
                options.message = options.message.replace(TITLE_PLACEHOLDER, &title);
            }
            Ok(None) => {
                tracing::debug!(
                    dataset_id = %dataset_id,
                    "no dataset title; prompt left unchanged"
                );
            }
            Err(e) => {
                tracing::warn!(dataset_id = %dataset_id, "dataset title lookup failed: {}", e);
            }
        }

        if !self.confirm(&mut session, &options).await {
            return Ok(self.finish(session, WorkflowOutcome::Declined).await);
        }

        self.start_progress(&mut session).await;
        let outcome = match self.api.decrypt(&input, &output, &url).await {
            Ok(reply) => match reply.into_result(DECRYPT) {
                Ok(_) => WorkflowOutcome::Done { artifact: None },
                Err(e) => WorkflowOutcome::failed(e),
            },
            Err(e) => WorkflowOutcome::failed(e.into()),
        };
        Ok(self.finish(session, outcome).await)
    }
}
