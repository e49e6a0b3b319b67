use crate::core::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One graph transition, written as a JSON line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub run_id: String,
    pub question_id: String,
    pub ts: String,
    pub step: String,
    pub route: Option<String>,
    pub attempts: u32,
    pub sql_error: Option<String>,
    pub duration_ms: u64,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Discards every event.
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&self, _event: &TraceEvent) {}
}

/// Appends events to a JSONL file; write failures are logged, never raised.
pub struct JsonlTrace {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTrace {
    pub fn create(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl TraceSink for JsonlTrace {
    fn record(&self, event: &TraceEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("trace event not serializable: {}", e);
                return;
            }
        };
        let Ok(mut file) = self.file.lock() else {
            tracing::warn!("trace file lock poisoned: {}", self.path.display());
            return;
        };
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("failed to append trace to {}: {}", self.path.display(), e);
        }
    }
}

pub fn read_events(path: &Path) -> Result<Vec<TraceEvent>, AgentError> {
    let content = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        events.push(serde_json::from_str(line)?);
    }
    Ok(events)
}
