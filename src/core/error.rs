use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Corpus error: {0}")]
    Corpus(String),
    #[error("Language model error: {0}")]
    LanguageModel(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
