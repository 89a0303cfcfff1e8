//! # Media Relay CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - configuration loading and validation
//! - batch input from `--id` / `--id-file`
//! - pipeline run with live status, summary and failed-id report
//! - graceful cancellation on Ctrl+C / SIGTERM

mod cli;
mod commands;
mod error;
mod input;
mod report;
mod status;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_validate};

/// Exit code when the run finished but some ids failed
const EXIT_TASKS_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: cli.metrics_port(),
        default_log_level: cli.log_level().to_string(),
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "Media relay starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await.map(|all_ok| {
            if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_TASKS_FAILED)
            }
        }),
        Commands::Validate(args) => run_validate(args).map(|()| ExitCode::SUCCESS),
        Commands::Info(args) => run_info(args).map(|()| ExitCode::SUCCESS),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}
