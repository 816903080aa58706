use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cipherdesk::cli;
use cipherdesk::config::AppConfig;

#[derive(Parser)]
#[command(name = "cipherdesk", version, about = "Front end for the cryptographic worker")]
struct Cli {
    /// Config file (default: <data dir>/config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Spawn the worker, check it came up, print pass/fail counts and exit
    #[arg(long)]
    run_tests: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a directory
    Encrypt {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Decrypt a dataset
    Decrypt {
        #[arg(long)]
        dataset_id: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        url: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.log_level)
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let code = if args.run_tests {
        cli::smoke::run_smoke(config).await
    } else {
        match args.command {
            Some(Commands::Encrypt { input, output, yes }) => {
                cli::workflow::run_encrypt(config, input, output, yes).await
            }
            Some(Commands::Decrypt {
                dataset_id,
                input,
                output,
                url,
                yes,
            }) => cli::workflow::run_decrypt(config, dataset_id, input, output, url, yes).await,
            None => cli::serve::run_serve(config).await,
        }
    }
    .context("cipherdesk failed to start")?;

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
