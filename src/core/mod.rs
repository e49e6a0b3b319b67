//! Shared infrastructure: configuration, errors, logging and the external collaborators
//! (SQLite store, language model) the agent steps are built on.

pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod time;
pub mod trace;
