//! PM-008: Append-only JSONL run event log.

use crate::core::types::{RunEvent, TimestampedEvent};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generate an ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path within a state directory.
pub fn event_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

/// Append an event to the state directory's event log.
pub fn append_event(state_dir: &Path, event: RunEvent) -> Result<(), String> {
    std::fs::create_dir_all(state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    let path = event_log_path(state_dir);

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event back, in append order.
pub fn read_events(state_dir: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read event log {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| format!("invalid event line: {}", e)))
        .collect()
}

/// Event sink bound to one run. Write failures are logged, never fatal.
#[derive(Debug, Clone)]
pub struct EventLog {
    state_dir: PathBuf,
    run_id: String,
}

impl EventLog {
    pub fn new(state_dir: &Path, run_id: &str) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event: RunEvent) {
        if let Err(e) = append_event(&self.state_dir, event) {
            tracing::warn!(error = %e, "event log write failed");
        }
    }
}
