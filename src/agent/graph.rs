//! Orchestration core.
//!
//! A fixed set of nodes and a pure transition function. The driver applies
//! one step per node until `Done`:
//!
//! ```text
//! router ─┬─ rag/hybrid ─> retrieve ─> plan ─┬─ rag ────────────────┐
//!         │                                  └─ hybrid ─> nl2sql    │
//!         └─ sql ─────────────────────────────────────> nl2sql      │
//! nl2sql ─> execute ─┬─ error && attempts < max_repairs ─> nl2sql   │
//!                    └─ otherwise ─────────────────────> synth <────┘
//! synth ─> done
//! ```

use crate::agent::answer;
use crate::agent::executor::{self, ExecOutcome};
use crate::agent::nl2sql::{QueryBuilder, RepairHint, TunedProgram};
use crate::agent::planner::Planner;
use crate::agent::router::Router;
use crate::agent::state::{AgentState, QuestionRecord, Route};
use crate::agent::synth::{SynthInput, Synthesizer};
use crate::core::config::{AgentConfig, LoopConfig};
use crate::core::db::SqliteTool;
use crate::core::error::AgentError;
use crate::core::llm::LanguageModel;
use crate::core::time;
use crate::core::trace::{TraceEvent, TraceSink};
use crate::rag::retrieval::{CorpusIndex, Retriever};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Router,
    Retrieve,
    Plan,
    Nl2Sql,
    Execute,
    Synth,
    Done,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Router => "router",
            Node::Retrieve => "retrieve",
            Node::Plan => "plan",
            Node::Nl2Sql => "nl2sql",
            Node::Execute => "execute",
            Node::Synth => "synth",
            Node::Done => "done",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successor of `node` given the state after `node` ran.
pub fn next_node(node: Node, state: &AgentState, max_repairs: u32) -> Node {
    let route = state.route().unwrap_or(Route::Hybrid);
    match node {
        Node::Router if route.uses_retrieval() => Node::Retrieve,
        Node::Router => Node::Nl2Sql,
        Node::Retrieve => Node::Plan,
        Node::Plan => match route {
            Route::Rag => Node::Synth,
            Route::Sql | Route::Hybrid => Node::Nl2Sql,
        },
        Node::Nl2Sql => Node::Execute,
        Node::Execute => {
            if route == Route::Rag || state.sql.trim().is_empty() {
                Node::Synth
            } else if state.sql_error.is_some() && state.attempts() < max_repairs {
                Node::Nl2Sql
            } else {
                Node::Synth
            }
        }
        Node::Synth | Node::Done => Node::Done,
    }
}

/// Longest possible path: router, retrieve, plan, then one generate/execute
/// pair per attempt, then synth.
fn max_steps(max_repairs: u32) -> usize {
    3 + 2 * (max_repairs as usize + 1) + 1
}

/// Collaborators and settings for [`HybridAgent::from_parts`].
pub struct AgentParts {
    pub model: Arc<dyn LanguageModel>,
    pub retriever: Arc<dyn Retriever>,
    pub store: Arc<SqliteTool>,
    pub tuned: Option<TunedProgram>,
    pub settings: LoopConfig,
    pub top_k: usize,
    pub trace: Arc<dyn TraceSink>,
}

pub struct HybridAgent {
    router: Router,
    planner: Planner,
    query_builder: QueryBuilder,
    synthesizer: Synthesizer,
    retriever: Arc<dyn Retriever>,
    store: Arc<SqliteTool>,
    schema: Arc<str>,
    known_tables: Vec<String>,
    settings: LoopConfig,
    top_k: usize,
    trace: Arc<dyn TraceSink>,
    run_id: String,
}

impl HybridAgent {
    /// Open the store, index the corpus and load the tuned query builder.
    /// An empty corpus or a missing database is fatal; a broken tuned artifact is not.
    pub fn build(
        config: &AgentConfig,
        model: Arc<dyn LanguageModel>,
        trace: Arc<dyn TraceSink>,
    ) -> Result<Self, AgentError> {
        let store = SqliteTool::open(
            &config.paths.db_path,
            Duration::from_secs(config.agent.sql_timeout_secs),
        )?;
        let index = CorpusIndex::from_dir(&config.paths.docs_dir, config.retrieval.chunk_size)?;
        tracing::info!(
            chunks = index.len(),
            "indexed corpus at {}",
            config.paths.docs_dir.display()
        );

        let mut agent = Self::from_parts(AgentParts {
            model: model.clone(),
            retriever: Arc::new(index),
            store: Arc::new(store),
            tuned: None,
            settings: config.agent.clone(),
            top_k: config.retrieval.top_k,
            trace,
        })?;
        agent.query_builder = QueryBuilder::new(model).with_artifact(&config.paths.tuned_nl2sql);
        Ok(agent)
    }

    /// Snapshot the schema once; every run reuses it.
    pub fn from_parts(parts: AgentParts) -> Result<Self, AgentError> {
        let schema: Arc<str> = Arc::from(parts.store.get_schema_str()?);
        let known_tables = parts.store.get_tables()?;

        let mut query_builder = QueryBuilder::new(parts.model.clone());
        if let Some(program) = parts.tuned {
            query_builder = query_builder.with_program(program);
        }

        Ok(Self {
            router: Router::new(parts.model.clone()),
            planner: Planner::new(parts.model.clone()),
            query_builder,
            synthesizer: Synthesizer::new(parts.model, parts.settings.preview_rows),
            retriever: parts.retriever,
            store: parts.store,
            schema,
            known_tables,
            settings: parts.settings,
            top_k: parts.top_k,
            trace: parts.trace,
            run_id: time::new_run_id(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Process one question to completion.
    pub fn run(&self, record: &QuestionRecord) -> Result<AgentState, AgentError> {
        let mut state = AgentState::new(record);
        state.schema = self.schema.clone();

        let limit = max_steps(self.settings.max_repairs);
        let mut node = Node::Router;
        let mut steps = 0usize;
        while node != Node::Done {
            steps += 1;
            if steps > limit {
                return Err(AgentError::Validation(format!(
                    "question '{}' exceeded {} steps at node {}",
                    record.id, limit, node
                )));
            }

            let started = Instant::now();
            self.step(node, &mut state)?;
            let next = next_node(node, &state, self.settings.max_repairs);
            if node == Node::Execute && next == Node::Nl2Sql {
                state.begin_repair();
            }
            self.record(node, &state, started);

            tracing::debug!(
                question = %state.id,
                attempts = state.attempts(),
                "{} -> {}",
                node,
                next
            );
            node = next;
        }
        Ok(state)
    }

    fn step(&self, node: Node, state: &mut AgentState) -> Result<(), AgentError> {
        match node {
            Node::Router => {
                let route = self.router.route(&state.question);
                state.set_route(route)?;
            }
            Node::Retrieve => {
                state.fragments = self.retriever.retrieve(&state.question, self.top_k);
                let ids: Vec<String> = state.fragments.iter().map(|f| f.id.clone()).collect();
                state.citations.extend(ids);
            }
            Node::Plan => {
                let docs = state.fragments_context();
                state.constraints = Some(self.planner.plan(&state.question, &docs));
            }
            Node::Nl2Sql => {
                let constraints = state
                    .constraints
                    .as_ref()
                    .map(|c| c.to_compact_json())
                    .unwrap_or_else(|| "{}".to_string());
                let previous_sql = state.sql.clone();
                let hint = match (&state.sql_error, self.settings.repair_with_error_hint) {
                    (Some(error), true) => Some(RepairHint {
                        previous_sql: &previous_sql,
                        error,
                    }),
                    _ => None,
                };
                let sql = self.query_builder.build(
                    &state.question,
                    &self.schema,
                    &constraints,
                    hint.as_ref(),
                );
                state.record_generation(sql);
            }
            Node::Execute => {
                let outcome = executor::execute(state, &self.store, &self.known_tables);
                if outcome == ExecOutcome::Failed && state.attempts() >= self.settings.max_repairs {
                    tracing::warn!(
                        question = %state.id,
                        "repair budget exhausted after {} repairs",
                        state.attempts()
                    );
                }
            }
            Node::Synth => {
                let docs = state.fragments_context();
                let out = self.synthesizer.synthesize(&SynthInput {
                    question: &state.question,
                    format_hint: &state.format_hint,
                    docs: &docs,
                    sql: &state.sql,
                    columns: &state.sql_columns,
                    rows: &state.sql_rows,
                });
                state.final_answer = Some(answer::finalize(
                    &state.format_hint,
                    &out.answer_text,
                    &state.sql_columns,
                    &state.sql_rows,
                ));
                state.answer_text = out.answer_text;
                state.explanation = out.explanation;
                state.confidence = out.confidence;
            }
            Node::Done => {}
        }
        Ok(())
    }

    fn record(&self, node: Node, state: &AgentState, started: Instant) {
        self.trace.record(&TraceEvent {
            run_id: self.run_id.clone(),
            question_id: state.id.clone(),
            ts: time::now_epoch_z(),
            step: node.as_str().to_string(),
            route: state.route().map(|r| r.as_str().to_string()),
            attempts: state.attempts(),
            sql_error: state.sql_error.clone(),
            duration_ms: time::elapsed_ms(started),
        });
    }
}
