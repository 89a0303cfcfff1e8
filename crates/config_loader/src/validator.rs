//! Configuration validation
//!
//! Rules:
//! - queue_capacity >= 1
//! - every pool has workers >= 1 and max_attempts >= 1
//! - backoff_ms <= max_backoff_ms
//! - poll interval > 0, max_in_flight >= 1, max_errors >= 1
//! - local adapter directories are set
//! - status refresh > 0 when enabled

use contracts::{AdapterKind, ContractError, PipelineBlueprint, StageKind};

/// Validate a PipelineBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_pipeline(blueprint)?;
    validate_stages(blueprint)?;
    validate_poll(blueprint)?;
    validate_adapters(blueprint)?;
    validate_status(blueprint)?;
    Ok(())
}

fn validate_pipeline(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.pipeline.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "pipeline.queue_capacity",
            "queue_capacity must be >= 1",
        ));
    }
    Ok(())
}

/// Worker counts and retry policies of the three pools
fn validate_stages(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    for kind in StageKind::ALL {
        let stage = blueprint.stages.get(kind);
        if stage.workers == 0 {
            return Err(ContractError::config_validation(
                format!("stages.{kind}.workers"),
                "workers must be >= 1",
            ));
        }
        if stage.retry.max_attempts == 0 {
            return Err(ContractError::config_validation(
                format!("stages.{kind}.retry.max_attempts"),
                "max_attempts must be >= 1 (it counts the first attempt)",
            ));
        }
        if stage.retry.backoff_ms > stage.retry.max_backoff_ms {
            return Err(ContractError::config_validation(
                format!("stages.{kind}.retry"),
                format!(
                    "backoff_ms ({}) must be <= max_backoff_ms ({})",
                    stage.retry.backoff_ms, stage.retry.max_backoff_ms
                ),
            ));
        }
    }
    Ok(())
}

fn validate_poll(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let poll = &blueprint.poll;
    if poll.interval_ms == 0 {
        return Err(ContractError::config_validation(
            "poll.interval_ms",
            "interval_ms must be > 0",
        ));
    }
    if poll.max_in_flight == 0 {
        return Err(ContractError::config_validation(
            "poll.max_in_flight",
            "max_in_flight must be >= 1",
        ));
    }
    if poll.max_errors == 0 {
        return Err(ContractError::config_validation(
            "poll.max_errors",
            "max_errors must be >= 1",
        ));
    }
    Ok(())
}

fn validate_adapters(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let adapters = &blueprint.adapters;
    if adapters.kind != AdapterKind::Local {
        return Ok(());
    }

    for (field, dir) in [
        ("adapters.source_dir", &adapters.source_dir),
        ("adapters.work_dir", &adapters.work_dir),
        ("adapters.store_dir", &adapters.store_dir),
    ] {
        if dir.as_os_str().is_empty() {
            return Err(ContractError::config_validation(
                field,
                "directory cannot be empty for the local adapter",
            ));
        }
    }

    if adapters.work_dir == adapters.store_dir {
        return Err(ContractError::config_validation(
            "adapters.store_dir",
            "store_dir must differ from work_dir",
        ));
    }
    Ok(())
}

fn validate_status(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.status.enabled && blueprint.status.refresh_ms == 0 {
        return Err(ContractError::config_validation(
            "status.refresh_ms",
            "refresh_ms must be > 0 when the status display is enabled",
        ));
    }
    Ok(())
}
