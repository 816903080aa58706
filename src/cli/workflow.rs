use std::path::PathBuf;
use std::sync::Arc;

use crate::app::{App, Launch};
use crate::cli::ConsoleFrontEnd;
use crate::config::AppConfig;
use crate::error::Result;
use crate::workflow::{
    ConfirmOptions, DecryptRequest, WorkflowKind, WorkflowOutcome, TITLE_PLACEHOLDER,
};

/// Exit code for a second instance or a startup that never ran a workflow.
pub const EXIT_NOT_RUN: i32 = 1;
pub const EXIT_FAILED: i32 = 1;
/// Conventional exit code after an interrupt.
pub const EXIT_CANCELLED: i32 = 130;

/// Encrypt a directory through the worker. Ctrl+C cancels the running call.
pub async fn run_encrypt(
    config: AppConfig,
    input: PathBuf,
    output: PathBuf,
    assume_yes: bool,
) -> Result<i32> {
    let front_end = Arc::new(ConsoleFrontEnd::new(assume_yes));
    let app = match App::launch(config, front_end).await? {
        Launch::Started(app) => app,
        Launch::SecondInstance => return Ok(EXIT_NOT_RUN),
    };

    let orchestrator = app.orchestrator();
    let outcome: Result<WorkflowOutcome> = async {
        let mut session = orchestrator.begin(WorkflowKind::Encrypt)?;
        session.select_input(&input)?;
        session.select_output(&output)?;

        let options = ConfirmOptions::new(
            "Encrypt dataset",
            format!(
                "Encrypt all files in {} into {}?",
                input.display(),
                output.display()
            ),
        );
        let run = orchestrator.run_encrypt(session, options);
        tokio::pin!(run);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!("failed to listen for Ctrl+C: {}", e);
                        break (&mut run).await;
                    }
                    eprintln!("cipherdesk: cancelling encryption...");
                    if let Err(e) = orchestrator.cancel(WorkflowKind::Encrypt) {
                        eprintln!("cipherdesk: {}", e);
                    }
                }
            }
        }
    }
    .await;

    app.shutdown().await?;
    Ok(report(WorkflowKind::Encrypt, outcome?))
}

/// Decrypt a dataset through the worker.
pub async fn run_decrypt(
    config: AppConfig,
    dataset_id: String,
    input: PathBuf,
    output: PathBuf,
    url: String,
    assume_yes: bool,
) -> Result<i32> {
    let front_end = Arc::new(ConsoleFrontEnd::new(assume_yes));
    let app = match App::launch(config, front_end).await? {
        Launch::Started(app) => app,
        Launch::SecondInstance => return Ok(EXIT_NOT_RUN),
    };

    let orchestrator = app.orchestrator();
    let outcome: Result<WorkflowOutcome> = async {
        let mut session = orchestrator.begin(WorkflowKind::Decrypt)?;
        session.select_input(&input)?;
        session.select_output(&output)?;

        let request = DecryptRequest {
            dataset_id,
            url,
            options: ConfirmOptions::new(
                "Decrypt dataset",
                format!(
                    "Decrypt \"{}\" into {}?",
                    TITLE_PLACEHOLDER,
                    output.display()
                ),
            ),
        };
        orchestrator.run_decrypt(session, request).await
    }
    .await;

    app.shutdown().await?;
    Ok(report(WorkflowKind::Decrypt, outcome?))
}

fn report(kind: WorkflowKind, outcome: WorkflowOutcome) -> i32 {
    match outcome {
        WorkflowOutcome::Done { artifact } => {
            match artifact {
                Some(path) => eprintln!("cipherdesk: {} done: {}", kind, path),
                None => eprintln!("cipherdesk: {} done", kind),
            }
            0
        }
        WorkflowOutcome::Declined => {
            eprintln!("cipherdesk: {} not confirmed; nothing was done", kind);
            0
        }
        WorkflowOutcome::Cancelled => {
            eprintln!("cipherdesk: {} cancelled", kind);
            EXIT_CANCELLED
        }
        WorkflowOutcome::Error { message } => {
            eprintln!("cipherdesk: {} failed: {}", kind, message);
            EXIT_FAILED
        }
    }
}
