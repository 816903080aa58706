use std::sync::Arc;

use crate::app::{App, Launch};
use crate::cli::ConsoleFrontEnd;
use crate::config::AppConfig;
use crate::error::Result;

/// Start the worker and keep it running until Ctrl+C.
pub async fn run_serve(config: AppConfig) -> Result<i32> {
    let front_end = Arc::new(ConsoleFrontEnd::new(false));
    let app = match App::launch(config, front_end).await? {
        Launch::Started(app) => app,
        Launch::SecondInstance => return Ok(1),
    };

    if let Some(worker) = app.supervisor().status().await {
        eprintln!(
            "cipherdesk: worker pid {} listening on 127.0.0.1:{}",
            worker.pid,
            app.port()
        );
    }
    eprintln!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    eprintln!("cipherdesk: shutting down");
    app.shutdown().await?;
    Ok(0)
}
