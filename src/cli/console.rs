use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::CipherdeskError;
use crate::workflow::{
    ConfirmOptions, FrontEnd, ProgressHandle, WorkflowKind, WorkflowState, AFFIRMATIVE,
};

/// Terminal stand-in for the desktop window layer.
pub struct ConsoleFrontEnd {
    assume_yes: bool,
    next_handle: AtomicU64,
}

impl ConsoleFrontEnd {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            next_handle: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl FrontEnd for ConsoleFrontEnd {
    async fn on_transition(&self, kind: WorkflowKind, state: &WorkflowState) {
        tracing::debug!(kind = %kind, state = %state, "workflow state");
    }

    async fn confirm(&self, options: &ConfirmOptions) -> usize {
        if self.assume_yes {
            return AFFIRMATIVE;
        }

        let mut prompt = format!("{}\n{}\n", options.title, options.message);
        for (index, label) in options.buttons.iter().enumerate() {
            prompt.push_str(&format!("  [{}] {}\n", index, label));
        }
        prompt.push_str(&format!("choice [{}]: ", options.default_id));

        let mut stderr = tokio::io::stderr();
        let _ = stderr.write_all(prompt.as_bytes()).await;
        let _ = stderr.flush().await;

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) | Err(_) => usize::MAX,
            Ok(_) => parse_choice(&line, options),
        }
    }

    async fn show_progress(&self, kind: WorkflowKind) -> ProgressHandle {
        let handle = ProgressHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        match kind {
            WorkflowKind::Encrypt => {
                eprintln!("cipherdesk: encryption in progress (Ctrl+C to cancel)...")
            }
            WorkflowKind::Decrypt => eprintln!("cipherdesk: decryption in progress..."),
        }
        handle
    }

    async fn close_progress(&self, handle: ProgressHandle) {
        tracing::debug!(handle = handle.0, "progress closed");
    }

    async fn reveal_in_folder(&self, path: &Path) {
        println!("{}", path.display());
    }

    async fn cancel_failed(&self, kind: WorkflowKind, error: &CipherdeskError) {
        eprintln!("cipherdesk: could not cancel {}: {}", kind, error);
    }

    async fn notify(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}

/// Empty input picks the default button; anything unrecognised declines.
fn parse_choice(line: &str, options: &ConfirmOptions) -> usize {
    let answer = line.trim().to_ascii_lowercase();
    if answer.is_empty() {
        return options.default_id;
    }
    if let Ok(index) = answer.parse::<usize>() {
        return index;
    }
    match answer.as_str() {
        "y" | "yes" => AFFIRMATIVE,
        _ => options
            .buttons
            .iter()
            .position(|label| label.to_ascii_lowercase() == answer)
            .unwrap_or(usize::MAX),
    }
}
