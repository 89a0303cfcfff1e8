//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{AdapterKind, PipelineBlueprint, StageKind};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    pipeline: PipelineInfo,
    stages: Vec<StageInfo>,
    poll: PollInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapters: Option<AdapterInfo>,
}

#[derive(Serialize)]
struct PipelineInfo {
    queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    shutdown_grace_ms: u64,
}

#[derive(Serialize)]
struct StageInfo {
    stage: StageKind,
    workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry: Option<RetryInfo>,
}

#[derive(Serialize)]
struct RetryInfo {
    max_attempts: u32,
    backoff_ms: u64,
    max_backoff_ms: u64,
    jitter: bool,
}

#[derive(Serialize)]
struct PollInfo {
    interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    max_in_flight: usize,
    max_errors: u32,
}

#[derive(Serialize)]
struct AdapterInfo {
    kind: AdapterKind,
    source_dir: String,
    work_dir: String,
    store_dir: String,
    keep_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let stages = StageKind::ALL
        .iter()
        .map(|&kind| {
            let stage = blueprint.stages.get(kind);
            StageInfo {
                stage: kind,
                workers: stage.workers,
                retry: args.retry.then(|| RetryInfo {
                    max_attempts: stage.retry.max_attempts,
                    backoff_ms: stage.retry.backoff_ms,
                    max_backoff_ms: stage.retry.max_backoff_ms,
                    jitter: stage.retry.jitter,
                }),
            }
        })
        .collect();

    let adapters = args.adapters.then(|| {
        let a = &blueprint.adapters;
        AdapterInfo {
            kind: a.kind,
            source_dir: a.source_dir.display().to_string(),
            work_dir: a.work_dir.display().to_string(),
            store_dir: a.store_dir.display().to_string(),
            keep_local: a.keep_local,
            base_url: a.base_url.clone(),
        }
    });

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        pipeline: PipelineInfo {
            queue_capacity: blueprint.pipeline.queue_capacity,
            timeout_secs: blueprint.pipeline.timeout().map(|t| t.as_secs()),
            shutdown_grace_ms: blueprint.pipeline.shutdown_grace_ms,
        },
        stages,
        poll: PollInfo {
            interval_ms: blueprint.poll.interval_ms,
            timeout_secs: blueprint.poll.timeout().map(|t| t.as_secs()),
            max_in_flight: blueprint.poll.max_in_flight,
            max_errors: blueprint.poll.max_errors,
        },
        adapters,
    }
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("=== Media Relay Configuration ===\n");

    println!("Pipeline");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Queue capacity: {}", blueprint.pipeline.queue_capacity);
    match blueprint.pipeline.timeout() {
        Some(timeout) => println!("   ├─ Batch timeout: {}s", timeout.as_secs()),
        None => println!("   ├─ Batch timeout: none"),
    }
    println!("   └─ Shutdown grace: {}ms", blueprint.pipeline.shutdown_grace_ms);

    println!("\nStages");
    for (i, kind) in StageKind::ALL.iter().enumerate() {
        let is_last = i == StageKind::ALL.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };
        let stage = blueprint.stages.get(*kind);

        println!("   {} {} ({} workers)", prefix, kind, stage.workers);
        if args.retry {
            let retry = &stage.retry;
            println!(
                "   {}  └─ retry: {} attempts, backoff {}ms..{}ms{}",
                child_prefix,
                retry.max_attempts,
                retry.backoff_ms,
                retry.max_backoff_ms,
                if retry.jitter { ", jitter" } else { "" }
            );
        }
    }

    let poll = &blueprint.poll;
    println!("\nPolling");
    println!("   ├─ Interval: {}ms", poll.interval_ms);
    match poll.timeout() {
        Some(timeout) => println!("   ├─ Job timeout: {}s", timeout.as_secs()),
        None => println!("   ├─ Job timeout: none"),
    }
    println!("   ├─ Max in flight: {}", poll.max_in_flight);
    println!("   └─ Max consecutive errors: {}", poll.max_errors);

    let adapters = &blueprint.adapters;
    println!("\nAdapters: {:?}", adapters.kind);
    if args.adapters {
        println!("   ├─ Source: {}", adapters.source_dir.display());
        println!("   ├─ Work: {}", adapters.work_dir.display());
        println!("   ├─ Store: {}", adapters.store_dir.display());
        if let Some(ref url) = adapters.base_url {
            println!("   ├─ Base URL: {}", url);
        }
        println!("   └─ Keep local copies: {}", adapters.keep_local);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_info_sections_follow_flags() {
        let blueprint = PipelineBlueprint::default();
        let mut args = InfoArgs {
            config: PathBuf::from("relay.toml"),
            json: true,
            retry: false,
            adapters: false,
        };

        let info = build_config_info(&blueprint, &args);
        assert_eq!(info.stages.len(), 3);
        assert!(info.stages.iter().all(|s| s.retry.is_none()));
        assert!(info.adapters.is_none());
        assert_eq!(info.poll.timeout_secs, Some(10_800));
        assert_eq!(info.pipeline.timeout_secs, None);

        args.retry = true;
        args.adapters = true;
        let info = build_config_info(&blueprint, &args);
        assert_eq!(info.stages[2].workers, 4);
        assert_eq!(info.stages[0].retry.as_ref().unwrap().max_attempts, 3);
        assert_eq!(info.adapters.unwrap().kind, AdapterKind::Local);
    }
}
