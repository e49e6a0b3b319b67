//! Offline few-shot tuning of the query builder.
//!
//! Bootstrapping runs the untuned builder over the training set in order and
//! keeps the predictions that exactly match the gold query as demos. Remaining
//! examples are then added as labeled demos, in file order, up to the labeled
//! limit. The resulting program is written as JSON with a SHA-256 fingerprint
//! of its demos.

use crate::agent::nl2sql::{QueryBuilder, TUNED_FORMAT_VERSION, TunedProgram};
use crate::agent::signature::{Demo, NL2SQL};
use crate::core::error::AgentError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainExample {
    pub question: String,
    /// Falls back to the live schema when absent.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub constraints_json: Option<String>,
    pub sql: String,
}

impl TrainExample {
    fn constraints(&self) -> &str {
        self.constraints_json.as_deref().unwrap_or("{}")
    }

    fn schema_or<'a>(&'a self, live: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(live)
    }

    fn to_demo(&self, live_schema: &str, sql: &str) -> Demo {
        let mut demo = Demo::new();
        demo.insert("question".into(), Value::String(self.question.clone()));
        demo.insert("schema".into(), Value::String(self.schema_or(live_schema).to_string()));
        demo.insert("constraints_json".into(), Value::String(self.constraints().to_string()));
        demo.insert("sql".into(), Value::String(sql.to_string()));
        demo
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSettings {
    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,
    pub max_errors: usize,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            max_bootstrapped_demos: 4,
            max_labeled_demos: 20,
            max_errors: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub examples: usize,
    pub bootstrapped: usize,
    pub labeled: usize,
    pub errors: usize,
    pub baseline: Accuracy,
    pub tuned: Accuracy,
    pub fingerprint: String,
}

/// One JSON object per non-blank line.
pub fn load_examples(path: &Path) -> Result<Vec<TrainExample>, AgentError> {
    let content = fs::read_to_string(path)?;
    let mut examples = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let example: TrainExample = serde_json::from_str(line).map_err(|e| {
            AgentError::Validation(format!("{}:{}: {}", path.display(), idx + 1, e))
        })?;
        examples.push(example);
    }
    if examples.is_empty() {
        return Err(AgentError::Validation(format!(
            "no training examples in {}",
            path.display()
        )));
    }
    Ok(examples)
}

/// Equality after trimming and lower-casing.
pub fn sql_exact_match(predicted: &str, gold: &str) -> bool {
    predicted.trim().to_lowercase() == gold.trim().to_lowercase()
}

/// Generation failures count as misses.
pub fn accuracy(builder: &QueryBuilder, examples: &[TrainExample], live_schema: &str) -> Accuracy {
    let correct = examples
        .iter()
        .filter(|ex| {
            match builder.generate(&ex.question, ex.schema_or(live_schema), ex.constraints(), None) {
                Ok(sql) => sql_exact_match(&sql, &ex.sql),
                Err(e) => {
                    tracing::warn!("prediction failed for '{}': {}", ex.question, e);
                    false
                }
            }
        })
        .count();
    Accuracy {
        correct,
        total: examples.len(),
    }
}

pub struct Bootstrap {
    pub program: TunedProgram,
    pub bootstrapped: usize,
    pub labeled: usize,
    pub errors: usize,
}

/// Build a few-shot program from `examples` using the untuned `base` builder.
pub fn bootstrap_few_shot(
    base: &QueryBuilder,
    examples: &[TrainExample],
    live_schema: &str,
    settings: BootstrapSettings,
    model_id: &str,
) -> Result<Bootstrap, AgentError> {
    let mut demos = Vec::new();
    let mut used = vec![false; examples.len()];
    let mut errors = 0usize;

    for (idx, ex) in examples.iter().enumerate() {
        if demos.len() >= settings.max_bootstrapped_demos {
            break;
        }
        match base.generate(&ex.question, ex.schema_or(live_schema), ex.constraints(), None) {
            Ok(sql) if sql_exact_match(&sql, &ex.sql) => {
                demos.push(ex.to_demo(live_schema, &sql));
                used[idx] = true;
            }
            Ok(_) => {}
            Err(e) => {
                errors += 1;
                tracing::warn!("bootstrap error {}/{}: {}", errors, settings.max_errors, e);
                if errors >= settings.max_errors {
                    return Err(AgentError::LanguageModel(format!(
                        "bootstrap aborted after {} errors: {}",
                        errors, e
                    )));
                }
            }
        }
    }
    let bootstrapped = demos.len();

    let labeled_budget = settings.max_labeled_demos.saturating_sub(bootstrapped);
    let labeled: Vec<Demo> = examples
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .take(labeled_budget)
        .map(|(ex, _)| ex.to_demo(live_schema, &ex.sql))
        .collect();
    let labeled_count = labeled.len();
    demos.extend(labeled);

    let fingerprint = demos_fingerprint(&demos)?;
    Ok(Bootstrap {
        program: TunedProgram {
            version: TUNED_FORMAT_VERSION,
            instructions: Some(NL2SQL.instructions.to_string()),
            demos,
            fingerprint,
            model_id: model_id.to_string(),
            created_at: time::now_epoch_z(),
        },
        bootstrapped,
        labeled: labeled_count,
        errors,
    })
}

pub fn demos_fingerprint(demos: &[Demo]) -> Result<String, AgentError> {
    let bytes = serde_json::to_vec(demos)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn save_program(program: &TunedProgram, path: &Path) -> Result<(), AgentError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(program)?;
    fs::write(path, body)?;
    Ok(())
}

/// Baseline accuracy, bootstrap, save, tuned accuracy.
pub fn tune(
    base: QueryBuilder,
    examples: &[TrainExample],
    live_schema: &str,
    settings: BootstrapSettings,
    model_id: &str,
    out: &Path,
) -> Result<TuneReport, AgentError> {
    let baseline = accuracy(&base, examples, live_schema);
    tracing::info!(
        correct = baseline.correct,
        total = baseline.total,
        "baseline exact-match accuracy"
    );

    let boot = bootstrap_few_shot(&base, examples, live_schema, settings, model_id)?;
    save_program(&boot.program, out)?;
    tracing::info!(
        bootstrapped = boot.bootstrapped,
        labeled = boot.labeled,
        "wrote tuned query builder to {}",
        out.display()
    );

    let fingerprint = boot.program.fingerprint.clone();
    let tuned_builder = base.with_program(boot.program);
    let tuned = accuracy(&tuned_builder, examples, live_schema);

    Ok(TuneReport {
        examples: examples.len(),
        bootstrapped: boot.bootstrapped,
        labeled: boot.labeled,
        errors: boot.errors,
        baseline,
        tuned,
        fingerprint,
    })
}
