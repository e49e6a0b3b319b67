//! Query execution step.

use crate::agent::state::{AgentState, Route};
use crate::core::db::SqliteTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// `rag` route or no query text.
    Skipped,
    Succeeded,
    Failed,
}

/// Run the state's query. On success every known table named in the query
/// is cited; on failure the error and an empty result are recorded.
pub fn execute(state: &mut AgentState, store: &SqliteTool, known_tables: &[String]) -> ExecOutcome {
    let sql = state.sql.trim().to_string();
    if state.route() == Some(Route::Rag) || sql.is_empty() {
        state.clear_execution();
        return ExecOutcome::Skipped;
    }

    let result = store.run_sql(&sql);
    match result.error {
        Some(error) => {
            tracing::warn!(
                question = %state.id,
                generation = state.generations(),
                "sql execution failed: {}",
                error
            );
            state.record_execution_failure(error);
            ExecOutcome::Failed
        }
        None => {
            state.sql_error = None;
            state.sql_columns = result.columns;
            state.sql_rows = result.rows;
            state.citations.extend(referenced_tables(&result.sql, known_tables));
            ExecOutcome::Succeeded
        }
    }
}

/// Known tables whose names appear in `sql`, ignoring case, in catalogue order.
pub fn referenced_tables<'a>(sql: &str, known_tables: &'a [String]) -> Vec<&'a str> {
    let upper = sql.to_uppercase();
    known_tables
        .iter()
        .filter(|t| upper.contains(&t.to_uppercase()))
        .map(String::as_str)
        .collect()
}
