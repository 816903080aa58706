use std::sync::Arc;
use std::time::Duration;

use crate::app::{App, Launch};
use crate::cli::ConsoleFrontEnd;
use crate::config::AppConfig;
use crate::error::{CipherdeskError, Result};

const SPAWN_WORKER: &str = "spawn_worker";

/// `--run-tests`: launch, give the worker a moment, and check it is alive.
/// Prints pass/fail counts and returns the process exit code.
pub async fn run_smoke(config: AppConfig) -> Result<i32> {
    let wait = Duration::from_millis(config.smoke_wait_ms);
    let front_end = Arc::new(ConsoleFrontEnd::new(true));

    let app = match App::launch(config, front_end).await {
        Ok(Launch::Started(app)) => Some(app),
        Ok(Launch::SecondInstance) => return Ok(1),
        Err(e @ (CipherdeskError::Spawn { .. } | CipherdeskError::WorkerNotFound { .. })) => {
            eprintln!("cipherdesk: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    let total_tests = 1;
    let mut failed_tests = Vec::new();

    let spawned = match &app {
        Some(app) => {
            tokio::time::sleep(wait).await;
            app.supervisor().is_running().await
        }
        None => false,
    };
    if !spawned {
        failed_tests.push(SPAWN_WORKER);
    }
    let passing = total_tests - failed_tests.len();

    println!("of {} tests, {} passing", total_tests, passing);
    if !failed_tests.is_empty() {
        eprintln!("failed tests: {}", failed_tests.join(","));
    }

    if let Some(app) = app {
        app.shutdown().await?;
    }
    Ok(if failed_tests.is_empty() { 0 } else { 1 })
}
