//! Query builder and its persisted few-shot program.

use crate::agent::signature::{self, Demo, NL2SQL};
use crate::core::error::AgentError;
use crate::core::llm::LanguageModel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub const TUNED_FORMAT_VERSION: u32 = 1;

/// Tuned query-builder parameters: instructions plus worked examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunedProgram {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub demos: Vec<Demo>,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Deserialize)]
struct LegacyArtifact {
    predict: LegacyPredict,
}

#[derive(Deserialize)]
struct LegacyPredict {
    #[serde(default)]
    demos: Vec<Demo>,
    #[serde(default)]
    signature: Option<LegacySignature>,
}

#[derive(Deserialize)]
struct LegacySignature {
    #[serde(default)]
    instructions: Option<String>,
}

impl TunedProgram {
    /// Accepts both the native layout and the `{"predict": {...}}` layout
    /// written by the Python prototype's optimizer.
    pub fn from_json_str(content: &str) -> Result<Self, AgentError> {
        let value: Value = serde_json::from_str(content)?;
        if value.get("predict").is_some() {
            let legacy: LegacyArtifact = serde_json::from_value(value)?;
            return Ok(Self {
                version: 0,
                instructions: legacy.predict.signature.and_then(|s| s.instructions),
                demos: legacy.predict.demos,
                ..Self::default()
            });
        }
        let program: Self = serde_json::from_value(value)?;
        if program.version > TUNED_FORMAT_VERSION {
            return Err(AgentError::Validation(format!(
                "tuned program version {} is newer than supported version {}",
                program.version, TUNED_FORMAT_VERSION
            )));
        }
        Ok(program)
    }
}

/// `Ok(None)` when the file does not exist.
pub fn load_tuned(path: &Path) -> Result<Option<TunedProgram>, AgentError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    TunedProgram::from_json_str(&content).map(Some)
}

/// Failed query and its error, offered to the model when regenerating.
#[derive(Debug, Clone)]
pub struct RepairHint<'a> {
    pub previous_sql: &'a str,
    pub error: &'a str,
}

pub struct QueryBuilder {
    model: Arc<dyn LanguageModel>,
    program: Option<TunedProgram>,
}

impl QueryBuilder {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            program: None,
        }
    }

    pub fn with_program(mut self, program: TunedProgram) -> Self {
        self.program = Some(program);
        self
    }

    /// Load the tuned program at `path` if present. A broken artifact is logged
    /// and the base builder is used.
    pub fn with_artifact(self, path: &Path) -> Self {
        match load_tuned(path) {
            Ok(Some(program)) => {
                tracing::info!(
                    demos = program.demos.len(),
                    "loaded tuned query builder from {}",
                    path.display()
                );
                self.with_program(program)
            }
            Ok(None) => self,
            Err(e) => {
                tracing::warn!("failed to load tuned query builder {}: {}", path.display(), e);
                self
            }
        }
    }

    pub fn program(&self) -> Option<&TunedProgram> {
        self.program.as_ref()
    }

    /// One model call. The result is trimmed and may be empty.
    pub fn generate(
        &self,
        question: &str,
        schema: &str,
        constraints_json: &str,
        hint: Option<&RepairHint<'_>>,
    ) -> Result<String, AgentError> {
        let inputs = [
            ("question", question),
            ("schema", schema),
            ("constraints_json", constraints_json),
        ];
        let mut prompt = match &self.program {
            Some(program) => NL2SQL.render_with(
                program.instructions.as_deref().unwrap_or(NL2SQL.instructions),
                &inputs,
                &program.demos,
            ),
            None => NL2SQL.render(&inputs, &[]),
        };
        if let Some(hint) = hint {
            prompt.user.push_str(&format!(
                "previous_sql: {}\nprevious_error: {}\nThe previous query failed. Return a corrected query.\n",
                hint.previous_sql, hint.error
            ));
        }

        let raw = self.model.complete(&prompt)?;
        let outputs = NL2SQL.parse_outputs(&raw);
        let sql = signature::output_str(&outputs, "sql").unwrap_or_default();
        Ok(signature::strip_code_fence(&sql).trim().to_string())
    }

    /// Like [`generate`](Self::generate), but a failed call yields an empty query.
    pub fn build(
        &self,
        question: &str,
        schema: &str,
        constraints_json: &str,
        hint: Option<&RepairHint<'_>>,
    ) -> String {
        match self.generate(question, schema, constraints_json, hint) {
            Ok(sql) => sql,
            Err(e) => {
                tracing::warn!("query generation failed: {}", e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::Prompt;
    use std::sync::Mutex;

    struct Capture {
        reply: String,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl LanguageModel for Capture {
        fn complete(&self, prompt: &Prompt) -> Result<String, AgentError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.clone());
            }
            Ok(self.reply.clone())
        }
    }

    fn capture(reply: &str) -> Arc<Capture> {
        Arc::new(Capture {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn generate_trims_and_strips_fences() {
        let model = capture("{\"sql\": \"```sql\\nSELECT COUNT(*) FROM Orders;\\n```\"}");
        let builder = QueryBuilder::new(model);
        let sql = builder.generate("How many orders?", "TABLE Orders", "{}", None).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM Orders;");
    }

    #[test]
    fn empty_reply_is_an_empty_query() {
        let builder = QueryBuilder::new(capture("{\"sql\": \"  \"}"));
        assert_eq!(builder.build("q", "s", "{}", None), "");
    }

    #[test]
    fn repair_hint_reaches_the_prompt() {
        let model = capture("{\"sql\": \"SELECT 1\"}");
        let builder = QueryBuilder::new(model.clone());
        let hint = RepairHint {
            previous_sql: "SELECT * FROM Nope",
            error: "no such table: Nope",
        };
        builder.build("q", "s", "{}", Some(&hint));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].user.contains("previous_error: no such table: Nope"));
    }

    #[test]
    fn tuned_program_supplies_instructions_and_demos() {
        let model = capture("{\"sql\": \"SELECT 1\"}");
        let program = TunedProgram::from_json_str(
            r#"{"version": 1, "instructions": "Be brief.", "demos": [{"question": "Count orders", "sql": "SELECT COUNT(*) FROM Orders;"}]}"#,
        )
        .unwrap();
        let builder = QueryBuilder::new(model.clone()).with_program(program);
        builder.build("q", "s", "{}", None);
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].system.starts_with("Be brief."));
        assert!(prompts[0].user.contains("sql: SELECT COUNT(*) FROM Orders;"));
    }

    #[test]
    fn legacy_layout_is_accepted() {
        let program = TunedProgram::from_json_str(
            r#"{"predict": {"demos": [{"augmented": true, "question": "q", "sql": "SELECT 1"}], "signature": {"instructions": "Generate SQL."}, "lm": null}}"#,
        )
        .unwrap();
        assert_eq!(program.demos.len(), 1);
        assert_eq!(program.instructions.as_deref(), Some("Generate SQL."));
    }

    #[test]
    fn missing_artifact_is_none_and_broken_artifact_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("optimized_nl2sql.json");
        assert!(load_tuned(&path).unwrap().is_none());

        fs::write(&path, "{not json").unwrap();
        assert!(load_tuned(&path).is_err());
        let builder = QueryBuilder::new(capture("{}")).with_artifact(&path);
        assert!(builder.program().is_none());
    }

    #[test]
    fn newer_versions_are_rejected() {
        assert!(TunedProgram::from_json_str(r#"{"version": 99, "demos": []}"#).is_err());
    }
}
