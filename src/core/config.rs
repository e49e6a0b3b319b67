//! Agent configuration loaded from `hybridqa.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//! Relative paths are resolved against the directory holding the config file,
//! or the current directory when no file is present.

use crate::core::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "hybridqa.toml";
pub const ENV_MODEL: &str = "HYBRIDQA_MODEL";
pub const ENV_ENDPOINT: &str = "HYBRIDQA_ENDPOINT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub paths: PathsConfig,
    pub model: ModelConfig,
    pub retrieval: RetrievalConfig,
    pub agent: LoopConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
    /// Few-shot artifact for the query builder; optional at runtime.
    pub tuned_nl2sql: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/northwind.sqlite"),
            docs_dir: PathBuf::from("docs"),
            tuned_nl2sql: PathBuf::from("optimized_nl2sql.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:3b".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            top_k: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Upper bound on repair attempts; the first query generation is not counted.
    pub max_repairs: u32,
    pub preview_rows: usize,
    pub explanation_chars: usize,
    /// Feed the failed SQL and its error text back into regeneration.
    pub repair_with_error_hint: bool,
    pub sql_timeout_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_repairs: 2,
            preview_rows: 10,
            explanation_chars: 300,
            repair_with_error_hint: false,
            sql_timeout_secs: 30,
        }
    }
}

/// Command-line overrides applied on top of the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub docs_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl AgentConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, AgentError> {
        toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Load `explicit` if given, else `hybridqa.toml` under `cwd`, else defaults.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self, AgentError> {
        let candidate = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(AgentError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => {
                let default_path = cwd.join(CONFIG_FILE_NAME);
                default_path.exists().then_some(default_path)
            }
        };

        let (mut config, base) = match candidate {
            Some(path) => {
                let content = fs::read_to_string(&path)?;
                let config = Self::from_toml_str(&content)?;
                let base = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| cwd.to_path_buf());
                (config, base)
            }
            None => (Self::default(), cwd.to_path_buf()),
        };

        config.apply_env();
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var(ENV_MODEL) {
            if !model.trim().is_empty() {
                self.model.model = model.trim().to_string();
            }
        }
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                self.model.endpoint = endpoint.trim().to_string();
            }
        }
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.paths.db_path,
            &mut self.paths.docs_dir,
            &mut self.paths.tuned_nl2sql,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(db) = overrides.db_path {
            self.paths.db_path = db;
        }
        if let Some(docs) = overrides.docs_dir {
            self.paths.docs_dir = docs;
        }
        if let Some(model) = overrides.model {
            self.model.model = model;
        }
        if let Some(endpoint) = overrides.endpoint {
            self.model.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.retrieval.chunk_size == 0 {
            return Err(AgentError::Config(
                "retrieval.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(AgentError::Config(
                "retrieval.top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AgentError::Config(format!(
                "model.temperature out of range: {}",
                self.model.temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.retrieval.chunk_size, 400);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.agent.max_repairs, 2);
        assert_eq!(cfg.agent.preview_rows, 10);
        assert_eq!(cfg.agent.explanation_chars, 300);
        assert!(!cfg.agent.repair_with_error_hint);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [retrieval]
            top_k = 6

            [agent]
            repair_with_error_hint = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retrieval.top_k, 6);
        assert_eq!(cfg.retrieval.chunk_size, 400);
        assert!(cfg.agent.repair_with_error_hint);
        assert_eq!(cfg.model.model, "qwen2.5:3b");
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg_path = tmp.path().join("custom.toml");
        fs::write(&cfg_path, "[paths]\ndb_path = \"db/shop.sqlite\"\n").unwrap();

        let cfg = AgentConfig::load(Some(&cfg_path), Path::new("/nonexistent")).unwrap();
        assert_eq!(cfg.paths.db_path, tmp.path().join("db/shop.sqlite"));
        assert_eq!(cfg.paths.docs_dir, tmp.path().join("docs"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AgentConfig::load(Some(&tmp.path().join("nope.toml")), tmp.path()).unwrap_err();
        assert!(format!("{}", err).contains("config file not found"));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let cfg = AgentConfig::from_toml_str("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut cfg = AgentConfig::default();
        cfg.apply_overrides(Overrides {
            db_path: Some(PathBuf::from("/tmp/other.sqlite")),
            model: Some("llama3.2:3b".to_string()),
            ..Overrides::default()
        });
        assert_eq!(cfg.paths.db_path, PathBuf::from("/tmp/other.sqlite"));
        assert_eq!(cfg.model.model, "llama3.2:3b");
        assert_eq!(cfg.paths.docs_dir, PathBuf::from("docs"));
    }
}
