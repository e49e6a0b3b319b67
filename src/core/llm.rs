//! Language-model collaborator.
//!
//! Steps receive an `Arc<dyn LanguageModel>` handle; nothing here is global.
//! The production implementation talks to a local Ollama server over HTTP.

use crate::core::config::ModelConfig;
use crate::core::error::AgentError;
use std::time::Duration;

/// A rendered prompt for one signature call.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Signature name (`route`, `plan`, `nl2sql`, `synthesize`).
    pub signature: &'static str,
    pub system: String,
    pub user: String,
}

pub trait LanguageModel: Send + Sync {
    /// Return the raw completion text for `prompt`.
    fn complete(&self, prompt: &Prompt) -> Result<String, AgentError>;

    /// Identifier recorded in traces and tuning artifacts.
    fn model_id(&self) -> String {
        "unknown".to_string()
    }
}

/// Blocking Ollama client (`/api/chat`, non-streaming, JSON mode).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: ModelConfig,
    agent: ureq::Agent,
}

impl OllamaClient {
    pub fn new(config: ModelConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "stream": false,
            "format": "json",
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        })
    }
}

impl LanguageModel for OllamaClient {
    fn complete(&self, prompt: &Prompt) -> Result<String, AgentError> {
        let endpoint = self.endpoint();
        let body = self.request_body(prompt);
        let attempts = self.config.max_retries + 1;

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self
                .agent
                .post(&endpoint)
                .set("Content-Type", "application/json")
                .send_json(&body)
            {
                Ok(response) => {
                    let payload: serde_json::Value = response.into_json().map_err(|e| {
                        AgentError::LanguageModel(format!("failed to decode response: {}", e))
                    })?;
                    return extract_content(&payload);
                }
                Err(e) => {
                    tracing::warn!(
                        signature = prompt.signature,
                        "ollama request failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(Duration::from_millis(250 * attempt as u64));
                    }
                }
            }
        }

        Err(AgentError::LanguageModel(format!(
            "ollama request failed after {} attempts: {}",
            attempts, last_error
        )))
    }

    fn model_id(&self) -> String {
        self.config.model.clone()
    }
}

fn extract_content(payload: &serde_json::Value) -> Result<String, AgentError> {
    payload
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| payload.get("response"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| AgentError::LanguageModel(format!("unexpected response shape: {}", payload)))
}
