//! Answer synthesis step.

use crate::agent::signature::{self, SYNTHESIZE};
use crate::core::llm::LanguageModel;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthOutput {
    pub answer_text: String,
    pub explanation: String,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
}

impl Default for SynthOutput {
    fn default() -> Self {
        Self {
            answer_text: String::new(),
            explanation: String::new(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

/// Everything the synthesizer sees for one question.
#[derive(Debug, Clone, Copy)]
pub struct SynthInput<'a> {
    pub question: &'a str,
    pub format_hint: &'a str,
    pub docs: &'a str,
    pub sql: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Vec<Value>],
}

pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    preview_rows: usize,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, preview_rows: usize) -> Self {
        Self {
            model,
            preview_rows,
        }
    }

    pub fn synthesize(&self, input: &SynthInput<'_>) -> SynthOutput {
        let rows_json = rows_preview(input.columns, input.rows, self.preview_rows);
        let prompt = SYNTHESIZE.render(
            &[
                ("question", input.question),
                ("format_hint", input.format_hint),
                ("top_docs", input.docs),
                ("sql", input.sql),
                ("sql_rows_json", &rows_json),
            ],
            &[],
        );

        match self.model.complete(&prompt) {
            Ok(raw) => from_outputs(&SYNTHESIZE.parse_outputs(&raw)),
            Err(e) => {
                tracing::warn!("answer synthesis failed: {}", e);
                SynthOutput::default()
            }
        }
    }
}

/// `{"columns": [...], "rows": [...]}` with at most `limit` rows.
pub fn rows_preview(columns: &[String], rows: &[Vec<Value>], limit: usize) -> String {
    let preview = &rows[..rows.len().min(limit)];
    serde_json::json!({ "columns": columns, "rows": preview }).to_string()
}

fn from_outputs(outputs: &Map<String, Value>) -> SynthOutput {
    // A JSON-valued answer is re-serialized so finalization can parse it back.
    let answer_text = signature::output_str(outputs, "answer_text").unwrap_or_default();
    let explanation = signature::output_str(outputs, "explanation").unwrap_or_default();
    let confidence = outputs
        .get("confidence")
        .map(coerce_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);
    SynthOutput {
        answer_text,
        explanation,
        confidence,
    }
}

/// Any number or numeric string, clamped to `[0, 1]`; anything else is the default.
pub fn coerce_confidence(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AgentError;
    use crate::core::llm::Prompt;
    use serde_json::json;
    use std::sync::Mutex;

    struct Capture {
        reply: Result<String, String>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl LanguageModel for Capture {
        fn complete(&self, prompt: &Prompt) -> Result<String, AgentError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.clone());
            }
            self.reply.clone().map_err(AgentError::LanguageModel)
        }
    }

    fn input<'a>(columns: &'a [String], rows: &'a [Vec<Value>]) -> SynthInput<'a> {
        SynthInput {
            question: "How many orders?",
            format_hint: "int",
            docs: "",
            sql: "SELECT COUNT(*) FROM Orders;",
            columns,
            rows,
        }
    }

    #[test]
    fn parses_model_outputs() {
        let model = Arc::new(Capture {
            reply: Ok(r#"{"answer_text": 830, "explanation": "Counted orders.", "confidence": "0.9"}"#.to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let synth = Synthesizer::new(model, 10);
        let out = synth.synthesize(&input(&[], &[]));
        assert_eq!(out.answer_text, "830");
        assert_eq!(out.explanation, "Counted orders.");
        assert_eq!(out.confidence, 0.9);
    }

    #[test]
    fn prompt_sees_only_the_row_preview() {
        let model = Arc::new(Capture {
            reply: Ok("{}".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let synth = Synthesizer::new(model.clone(), 10);
        let columns = vec!["n".to_string()];
        let rows: Vec<Vec<Value>> = (0..25).map(|i| vec![json!(i)]).collect();
        synth.synthesize(&input(&columns, &rows));

        let prompts = model.prompts.lock().unwrap();
        let line = prompts[0]
            .user
            .lines()
            .find(|l| l.starts_with("sql_rows_json: "))
            .unwrap();
        let preview: Value = serde_json::from_str(line.trim_start_matches("sql_rows_json: ")).unwrap();
        assert_eq!(preview["rows"].as_array().unwrap().len(), 10);
        assert_eq!(preview["columns"], json!(["n"]));
    }

    #[test]
    fn confidence_coercion() {
        assert_eq!(coerce_confidence(&json!(0.75)), 0.75);
        assert_eq!(coerce_confidence(&json!(" 0.2 ")), 0.2);
        assert_eq!(coerce_confidence(&json!(3)), 1.0);
        assert_eq!(coerce_confidence(&json!(-1)), 0.0);
        assert_eq!(coerce_confidence(&json!("high")), DEFAULT_CONFIDENCE);
        assert_eq!(coerce_confidence(&json!(null)), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn failed_call_yields_defaults() {
        let model = Arc::new(Capture {
            reply: Err("timeout".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let out = Synthesizer::new(model, 10).synthesize(&input(&[], &[]));
        assert_eq!(out, SynthOutput::default());
        assert_eq!(out.confidence, 0.5);
    }
}
