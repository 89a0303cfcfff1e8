//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{AdapterKind, PipelineBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    adapter: String,
    workers: [usize; 3],
    queue_capacity: usize,
    poll_interval_ms: u64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    adapter: format!("{:?}", blueprint.adapters.kind),
                    workers: [
                        blueprint.stages.fetch.workers,
                        blueprint.stages.transfer.workers,
                        blueprint.stages.analyze.workers,
                    ],
                    queue_capacity: blueprint.pipeline.queue_capacity,
                    poll_interval_ms: blueprint.poll.interval_ms,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.stages.fetch.workers > 1 {
        warnings.push(format!(
            "stages.fetch.workers = {} - media providers usually rate-limit parallel downloads",
            blueprint.stages.fetch.workers
        ));
    }

    if blueprint.poll.timeout_secs == 0 {
        warnings.push("poll.timeout_secs = 0 - a stuck analysis job is polled forever".to_string());
    }

    if blueprint.stages.analyze.workers > blueprint.poll.max_in_flight {
        warnings.push(format!(
            "stages.analyze.workers ({}) exceeds poll.max_in_flight ({}) - jobs will queue for status queries",
            blueprint.stages.analyze.workers, blueprint.poll.max_in_flight
        ));
    }

    if blueprint.adapters.kind == AdapterKind::Local && !blueprint.adapters.source_dir.exists() {
        warnings.push(format!(
            "adapters.source_dir {} does not exist yet",
            blueprint.adapters.source_dir.display()
        ));
    }

    if !blueprint.adapters.simulated.fail_ids.is_empty() {
        warnings.push(format!(
            "{} ids are scripted to fail in simulated analysis",
            blueprint.adapters.simulated.fail_ids.len()
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Adapter: {}", summary.adapter);
            println!(
                "  Workers: fetch={} transfer={} analyze={}",
                summary.workers[0], summary.workers[1], summary.workers[2]
            );
            println!("  Queue capacity: {}", summary.queue_capacity);
            println!("  Poll interval: {}ms", summary.poll_interval_ms);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        (file, args)
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let (_file, args) = args_for(
            r#"
[stages.fetch]
workers = 3

[poll]
timeout_secs = 0

[adapters]
kind = "simulated"
"#,
        );
        let result = validate_config(&args);
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(result.summary.unwrap().workers, [3, 1, 4]);
    }

    #[test]
    fn test_invalid_config() {
        let (_file, args) = args_for("[stages.analyze]\nworkers = 0\n");
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("workers"));
        assert!(run_validate(&args).is_err());
    }
}
