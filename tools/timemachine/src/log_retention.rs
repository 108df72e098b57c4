use crate::errors::TimeMachineError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Deletes the oldest `*.jsonl` files in `dir` until the directory's log total
/// fits `budget_bytes`. The active log file is never removed.
pub fn prune_to_budget(
    dir: &Path,
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, TimeMachineError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| TimeMachineError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified, meta.len()))
        })
        .collect::<Vec<_>>();

    logs.sort_by_key(|(_, modified, _)| *modified);

    let mut total = logs.iter().map(|(_, _, len)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, _, len) in logs {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| TimeMachineError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
