//! Batch input: ids from the command line and from an id file.

use std::collections::HashSet;
use std::path::Path;

use contracts::TaskId;
use tracing::{debug, warn};

use crate::error::{CliError, Result};

/// Ids listed in a file, one per line
///
/// Surrounding whitespace is trimmed; blank lines and lines starting with
/// `#` are skipped.
pub fn parse_id_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Merge `--id` values and the id file into one batch
///
/// Command-line ids come first. Duplicates are dropped, keeping the first
/// occurrence.
pub fn collect_ids(cli_ids: &[String], id_file: Option<&Path>) -> Result<Vec<TaskId>> {
    let mut raw: Vec<String> = cli_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    if let Some(path) = id_file {
        let content =
            std::fs::read_to_string(path).map_err(|e| CliError::read_input(path, e))?;
        let from_file = parse_id_list(&content);
        debug!(path = %path.display(), count = from_file.len(), "Read id file");
        raw.extend(from_file);
    }

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(raw.len());
    let mut duplicates = 0usize;
    for id in raw {
        if seen.insert(id.clone()) {
            ids.push(TaskId::from(id));
        } else {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!(duplicates, "Ignoring duplicate ids");
    }

    if ids.is_empty() {
        return Err(CliError::NoIds);
    }
    Ok(ids)
}
