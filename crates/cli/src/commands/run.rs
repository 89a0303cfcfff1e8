//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{PipelineBlueprint, StageKind};
use controller::PipelineController;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::input::collect_ids;
use crate::report::{print_summary, rerun_hint, write_failed_ids, write_json_report};
use crate::status::StatusReporter;

/// Execute the `run` command
///
/// Returns `true` when every id succeeded.
pub async fn run_pipeline(args: &RunArgs) -> Result<bool> {
    let blueprint = load_blueprint(args)?;
    let ids = collect_ids(&args.ids, args.id_file.as_deref())?;

    info!(
        ids = ids.len(),
        adapter = ?blueprint.adapters.kind,
        fetch_workers = blueprint.stages.fetch.workers,
        transfer_workers = blueprint.stages.transfer.workers,
        analyze_workers = blueprint.stages.analyze.workers,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration and ids are valid, exiting");
        println!("{} ids ready, configuration valid", ids.len());
        return Ok(true);
    }

    let adapters = adapters::build_adapters(&blueprint.adapters)
        .await
        .context("Failed to prepare adapters")?;

    let status = blueprint.status.clone();
    let controller =
        PipelineController::new(blueprint, adapters.fetch, adapters.transfer, adapters.analyze);
    let registry = controller.registry();
    let cancel = controller.cancel_token();

    let reporter = (status.enabled && !args.no_status).then(|| {
        StatusReporter::spawn(registry.clone(), Duration::from_millis(status.refresh_ms))
    });
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    info!("Starting pipeline...");
    let report = controller
        .run_with_report(ids)
        .await
        .context("Pipeline execution failed")?;

    signals.abort();
    if let Some(reporter) = reporter {
        reporter.stop().await;
    }

    let records = registry.snapshot();
    print_summary(&report, &records);

    if let Some(path) = write_failed_ids(&args.output_dir, &records)? {
        println!("\nFailed ids written to {}", path.display());
        println!("Re-run them with: {}", rerun_hint(&path));
    }
    if let Some(path) = &args.report {
        write_json_report(path, &report)?;
        info!(path = %path.display(), "Report written");
    }

    info!("Media relay finished");
    Ok(report.batch.all_succeeded())
}

/// Load the configuration file (or defaults) and apply CLI overrides
fn load_blueprint(args: &RunArgs) -> Result<PipelineBlueprint> {
    let mut blueprint = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            if !path.exists() {
                return Err(CliError::config_not_found(path).into());
            }
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            PipelineBlueprint::default()
        }
    };

    apply_overrides(&mut blueprint, args);
    ConfigLoader::validate(&blueprint).context("Invalid configuration after CLI overrides")?;
    Ok(blueprint)
}

fn apply_overrides(blueprint: &mut PipelineBlueprint, args: &RunArgs) {
    if let Some(kind) = args.adapter {
        blueprint.adapters.kind = kind.into();
    }
    if let Some(dir) = &args.source_dir {
        blueprint.adapters.source_dir = dir.clone();
    }
    if args.keep {
        blueprint.adapters.keep_local = true;
    }

    let workers = [
        (StageKind::Fetch, args.fetch_workers),
        (StageKind::Transfer, args.transfer_workers),
        (StageKind::Analyze, args.analyze_workers),
    ];
    for (kind, count) in workers {
        if let Some(count) = count {
            info!(stage = %kind, workers = count, "Overriding worker count from CLI");
            blueprint.stages.get_mut(kind).workers = count;
        }
    }

    if let Some(interval) = args.poll_interval_ms {
        blueprint.poll.interval_ms = interval;
    }
    if let Some(timeout) = args.timeout {
        blueprint.pipeline.timeout_secs = timeout;
    }
}

/// Cancel the batch on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Received shutdown signal, cancelling batch...");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{AdapterArg, Cli, Commands};
    use clap::Parser;
    use contracts::AdapterKind;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["media-relay", "run"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_overrides_apply() {
        let args = run_args(&[
            "--id",
            "a",
            "--adapter",
            "simulated",
            "--keep",
            "--transfer-workers",
            "3",
            "--poll-interval-ms",
            "250",
            "--timeout",
            "60",
        ]);
        assert_eq!(args.adapter, Some(AdapterArg::Simulated));

        let blueprint = load_blueprint(&args).unwrap();
        assert_eq!(blueprint.adapters.kind, AdapterKind::Simulated);
        assert!(blueprint.adapters.keep_local);
        assert_eq!(blueprint.stages.transfer.workers, 3);
        assert_eq!(blueprint.stages.fetch.workers, 1);
        assert_eq!(blueprint.poll.interval_ms, 250);
        assert_eq!(blueprint.pipeline.timeout_secs, 60);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = run_args(&["--id", "a", "--fetch-workers", "0"]);
        assert!(load_blueprint(&args).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = run_args(&["--config", "/definitely/not/here.toml", "--id", "a"]);
        let err = load_blueprint(&args).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_simulated_run_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("relay.toml");
        std::fs::write(
            &config,
            r#"
[adapters]
kind = "simulated"

[adapters.simulated]
latency_ms = 0
polls_until_done = 1
fail_ids = ["bad"]

[poll]
interval_ms = 10

[status]
enabled = false
"#,
        )
        .unwrap();
        let output = dir.path().join("out");
        let report = dir.path().join("report.json");

        let args = run_args(&[
            "--config",
            config.to_str().unwrap(),
            "--id",
            "good,bad",
            "--output-dir",
            output.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ]);

        let all_ok = run_pipeline(&args).await.unwrap();
        assert!(!all_ok);
        assert_eq!(
            std::fs::read_to_string(output.join("failed_ids.txt")).unwrap(),
            "bad\n"
        );
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(value["batch"]["succeeded"][0], "good");
        assert_eq!(value["batch"]["failed"]["bad"]["kind"], "external_service");
    }
}
