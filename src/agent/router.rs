//! Route selection.

use crate::agent::signature::{self, ROUTE};
use crate::agent::state::Route;
use crate::core::llm::LanguageModel;
use std::sync::Arc;

/// Policy/document lookups; always answered from the corpus alone.
const RAG_KEYWORDS: &[&str] = &[
    "according to the product policy",
    "product policy",
    "return window",
    "returns & policy",
];

/// All-time aggregates and fixed top-N rankings; always answered from the database alone.
const SQL_KEYWORDS: &[&str] = &["top 3 products", "top three products", "all-time"];

pub struct Router {
    model: Arc<dyn LanguageModel>,
}

impl Router {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Keyword overrides first, then the model's label, then `hybrid`.
    pub fn route(&self, question: &str) -> Route {
        if let Some(route) = keyword_route(question) {
            tracing::debug!(route = %route, "route decided by keyword");
            return route;
        }

        let prompt = ROUTE.render(&[("question", question)], &[]);
        let raw = match self.model.complete(&prompt) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("route classification failed, using hybrid: {}", e);
                return Route::Hybrid;
            }
        };

        let outputs = ROUTE.parse_outputs(&raw);
        let label = signature::output_str(&outputs, "route").unwrap_or_default();
        match Route::from_label(&label) {
            Some(route) => route,
            None => {
                tracing::warn!(label = %label, "invalid route label, using hybrid");
                Route::Hybrid
            }
        }
    }
}

/// Deterministic override, if any keyword matches. RAG keywords win.
pub fn keyword_route(question: &str) -> Option<Route> {
    let q = question.to_lowercase();
    if RAG_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Some(Route::Rag);
    }
    if SQL_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Some(Route::Sql);
    }
    None
}
