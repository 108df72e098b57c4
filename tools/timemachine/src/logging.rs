use crate::errors::TimeMachineError;
use crate::log_retention::prune_to_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_LOG_BUDGET_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: LogLevel,
    pub event_type: &'a str,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    seq: u64,
    level: LogLevel,
    event_type: &'a str,
    payload: Value,
}

/// Append-only JSONL event log. Clones share one sequence counter.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
    seq: Arc<AtomicU64>,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_LOG_BUDGET_BYTES,
            seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TimeMachineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| TimeMachineError::Io(e.to_string()))?;
            }
        }
        let line = serde_json::to_string(&LogLine {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| TimeMachineError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TimeMachineError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| TimeMachineError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = prune_to_budget(parent, &self.path, self.budget_bytes)?;
            }
        }
        Ok(())
    }
}

/// One-line `key=value` summary used when stdout is not a terminal.
pub fn structured_fallback_line(phase: &str, step: usize, message: &str) -> String {
    format!(
        "phase={phase} step={step} message={}",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
