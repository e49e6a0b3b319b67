//! Batch driver: JSONL questions in, JSONL answers out.

use crate::agent::graph::HybridAgent;
use crate::agent::state::{AgentState, QuestionRecord};
use crate::core::error::AgentError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub final_answer: Value,
    pub sql: String,
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<String>,
}

impl OutputRecord {
    pub fn from_state(state: &AgentState, explanation_chars: usize) -> Self {
        Self {
            id: state.id.clone(),
            final_answer: state
                .final_answer
                .as_ref()
                .map(|a| a.to_json())
                .unwrap_or(Value::Null),
            sql: state.sql.clone(),
            confidence: state.confidence,
            explanation: truncate_chars(&state.explanation, explanation_chars),
            citations: state.citations.as_slice().to_vec(),
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

pub fn load_jsonl(path: &Path) -> Result<Vec<QuestionRecord>, AgentError> {
    let content = fs::read_to_string(path).map_err(|e| {
        AgentError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read batch {}: {}", path.display(), e),
        ))
    })?;
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: QuestionRecord = serde_json::from_str(line).map_err(|e| {
            AgentError::Validation(format!("{}:{}: {}", path.display(), idx + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_jsonl(path: &Path, records: &[OutputRecord]) -> Result<(), AgentError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    let mut file = fs::File::create(path)?;
    file.write_all(&buf)?;
    Ok(())
}

/// Run every record. `jobs > 1` processes records in parallel; output order
/// always matches input order. Nothing is written here.
pub fn run_batch(
    agent: &HybridAgent,
    records: &[QuestionRecord],
    jobs: usize,
    explanation_chars: usize,
) -> Result<Vec<OutputRecord>, AgentError> {
    let total = records.len();
    let process = |(idx, record): (usize, &QuestionRecord)| -> Result<OutputRecord, AgentError> {
        let state = agent.run(record)?;
        tracing::info!(
            question = %record.id,
            route = state.route().map(|r| r.as_str()).unwrap_or("-"),
            attempts = state.attempts(),
            "answered {}/{}",
            idx + 1,
            total
        );
        Ok(OutputRecord::from_state(&state, explanation_chars))
    };

    if jobs <= 1 {
        return records.iter().enumerate().map(process).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to start worker pool: {}", e)))?;
    pool.install(|| records.par_iter().enumerate().map(process).collect())
}
