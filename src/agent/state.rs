//! Per-question records and the mutable state threaded through one run.

use crate::agent::format::FinalAnswer;
use crate::core::error::AgentError;
use crate::rag::retrieval::Fragment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One line of batch input. Never mutated once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub format_hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Rag,
    Sql,
    Hybrid,
}

impl Route {
    /// Accept exactly `rag`, `sql` or `hybrid`, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "rag" => Some(Route::Rag),
            "sql" => Some(Route::Sql),
            "hybrid" => Some(Route::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Rag => "rag",
            Route::Sql => "sql",
            Route::Hybrid => "hybrid",
        }
    }

    pub fn uses_retrieval(&self) -> bool {
        matches!(self, Route::Rag | Route::Hybrid)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered, duplicate-free evidence list (fragment ids, table names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Citations(Vec<String>);

impl Citations {
    /// Append unless already present. Returns whether it was added.
    pub fn push(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn extend<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.push(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|c| c == id)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalized planner output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub kpi: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
}

impl Constraints {
    /// Compact JSON passed to the query builder; `top_n` only when determined.
    pub fn to_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Mutable state for one question. Created with identity fields only.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: String,
    pub question: String,
    pub format_hint: String,

    route: Option<Route>,

    pub fragments: Vec<Fragment>,
    pub constraints: Option<Constraints>,

    pub schema: Arc<str>,
    pub sql: String,
    pub sql_error: Option<String>,
    pub sql_columns: Vec<String>,
    pub sql_rows: Vec<Vec<Value>>,

    pub answer_text: String,
    pub final_answer: Option<FinalAnswer>,
    pub explanation: String,
    pub confidence: f64,

    attempts: u32,
    generations: u32,
    pub citations: Citations,
}

impl AgentState {
    pub fn new(record: &QuestionRecord) -> Self {
        Self {
            id: record.id.clone(),
            question: record.question.clone(),
            format_hint: record.format_hint.clone(),
            route: None,
            fragments: Vec::new(),
            constraints: None,
            schema: Arc::from(""),
            sql: String::new(),
            sql_error: None,
            sql_columns: Vec::new(),
            sql_rows: Vec::new(),
            answer_text: String::new(),
            final_answer: None,
            explanation: String::new(),
            confidence: 0.0,
            attempts: 0,
            generations: 0,
            citations: Citations::default(),
        }
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Set the route. A second call is rejected: downstream steps rely on it being fixed.
    pub fn set_route(&mut self, route: Route) -> Result<(), AgentError> {
        match self.route {
            Some(existing) => Err(AgentError::Validation(format!(
                "route already set to '{}' for question '{}'",
                existing, self.id
            ))),
            None => {
                self.route = Some(route);
                Ok(())
            }
        }
    }

    /// Repairs taken so far. Only ever increases and never exceeds `max_repairs`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Query-generation calls made so far.
    pub fn generations(&self) -> u32 {
        self.generations
    }

    pub(crate) fn record_generation(&mut self, sql: String) {
        self.generations += 1;
        self.sql = sql;
    }

    pub(crate) fn clear_execution(&mut self) {
        self.sql_error = None;
        self.sql_columns.clear();
        self.sql_rows.clear();
    }

    pub(crate) fn record_execution_failure(&mut self, error: String) {
        self.sql_error = Some(error);
        self.sql_columns.clear();
        self.sql_rows.clear();
    }

    /// Count one repair before the query is regenerated.
    pub(crate) fn begin_repair(&mut self) {
        self.attempts += 1;
    }

    /// Retrieved fragments rendered as `[id] text` blocks.
    pub fn fragments_context(&self) -> String {
        self.fragments
            .iter()
            .map(|f| format!("[{}] {}", f.id, f.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> QuestionRecord {
        QuestionRecord {
            id: "q1".to_string(),
            question: "How many orders?".to_string(),
            format_hint: "int".to_string(),
        }
    }

    #[test]
    fn route_labels_are_strict_tokens() {
        assert_eq!(Route::from_label(" SQL \n"), Some(Route::Sql));
        assert_eq!(Route::from_label("Hybrid"), Some(Route::Hybrid));
        assert_eq!(Route::from_label("rag."), None);
        assert_eq!(Route::from_label("use sql"), None);
        assert_eq!(Route::from_label(""), None);
    }

    #[test]
    fn route_is_set_once() {
        let mut state = AgentState::new(&record());
        state.set_route(Route::Sql).unwrap();
        assert!(state.set_route(Route::Rag).is_err());
        assert_eq!(state.route(), Some(Route::Sql));
    }

    #[test]
    fn citations_deduplicate_in_first_seen_order() {
        let mut c = Citations::default();
        assert!(c.push("Orders"));
        assert!(c.push("kpi_definitions::chunk2"));
        assert!(!c.push("Orders"));
        c.extend(["Products", "kpi_definitions::chunk2"]);
        assert_eq!(
            c.as_slice(),
            &["Orders", "kpi_definitions::chunk2", "Products"]
        );
        assert!(c.contains("Products"));
        assert!(!c.contains("orders"));
    }

    #[test]
    fn only_rag_and_hybrid_routes_retrieve() {
        assert!(Route::Rag.uses_retrieval());
        assert!(Route::Hybrid.uses_retrieval());
        assert!(!Route::Sql.uses_retrieval());
    }

    #[test]
    fn constraints_omit_top_n_when_unknown() {
        let c = Constraints {
            kpi: Some("aov".to_string()),
            ..Constraints::default()
        };
        assert_eq!(
            c.to_compact_json(),
            r#"{"kpi":"aov","start_date":null,"end_date":null,"category":null}"#
        );

        let c = Constraints {
            top_n: Some(3),
            ..Constraints::default()
        };
        assert!(c.to_compact_json().ends_with(r#""top_n":3}"#));
    }

    #[test]
    fn execution_failure_clears_results_and_repairs_count_separately() {
        let mut state = AgentState::new(&record());
        state.sql_columns = vec!["n".to_string()];
        state.sql_rows = vec![vec![Value::from(1)]];
        state.record_execution_failure("no such table: Foo".to_string());
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.sql_error.as_deref(), Some("no such table: Foo"));
        state.begin_repair();
        assert_eq!(state.attempts(), 1);
        assert!(state.sql_rows.is_empty());
        assert!(state.sql_columns.is_empty());
    }
}
