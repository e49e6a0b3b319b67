//! hybridqa: a hybrid document/SQL question-answering agent.
//!
//! Each question is routed to the document corpus, the database, or both,
//! and answered in the shape its format hint asks for. All model calls go to
//! a local Ollama server; the database is opened read-only.
//!
//! # Flow
//!
//! ```text
//! router -> [retrieve -> plan] -> nl2sql <-> execute -> synth
//! ```
//!
//! - The router applies keyword overrides before asking the model.
//! - Retrieval and planning only run for `rag`/`hybrid` routes.
//! - A failed query is regenerated at most `agent.max_repairs` times.
//! - Synthesis finalizes the answer against the format hint and the query result.
//!
//! # Examples
//!
//! ```bash
//! # Answer a batch
//! hybridqa run --batch sample_questions.jsonl --out outputs.jsonl
//!
//! # Tune the query builder from labeled examples
//! hybridqa tune --train nl2sql_train.jsonl
//!
//! # Inspect what the agent sees
//! hybridqa schema
//! hybridqa search "return window for beverages"
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, logging, traces, SQLite and model collaborators
//! - [`rag`]: document corpus and TF-IDF retrieval
//! - [`agent`]: run state, step functions, orchestration graph, batch driver, tuning

pub mod agent;
pub mod core;
pub mod rag;

mod cli;

use crate::agent::{batch, graph::HybridAgent, nl2sql::QueryBuilder, tuning};
use crate::cli::{Cli, Command, RunCli, TuneCli};
use crate::core::{
    config::{AgentConfig, Overrides},
    db::SqliteTool,
    error::AgentError,
    llm::{LanguageModel, OllamaClient},
    logging,
    trace::{JsonlTrace, NullTrace, TraceSink},
};
use crate::rag::retrieval::{CorpusIndex, Retriever};

use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run() -> Result<(), AgentError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Run(run) => run_batch(cli.config.as_deref(), &current_dir, run),
        Command::Tune(tune) => run_tune(cli.config.as_deref(), &current_dir, tune),
        Command::Schema { paths } => {
            let config = load_config(cli.config.as_deref(), &current_dir, cli::overrides(&paths, None))?;
            let store = open_store(&config)?;
            println!("{}", store.get_schema_str()?);
            Ok(())
        }
        Command::Search {
            query,
            top_k,
            paths,
        } => {
            let config = load_config(cli.config.as_deref(), &current_dir, cli::overrides(&paths, None))?;
            let index = CorpusIndex::from_dir(&config.paths.docs_dir, config.retrieval.chunk_size)?;
            let fragments = index.retrieve(&query, top_k.unwrap_or(config.retrieval.top_k));
            let payload = serde_json::json!({
                "cmd": "search",
                "status": "ok",
                "query": query,
                "fragments": fragments,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
    }
}

fn load_config(
    explicit: Option<&Path>,
    cwd: &Path,
    overrides: Overrides,
) -> Result<AgentConfig, AgentError> {
    let mut config = AgentConfig::load(explicit, cwd)?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

fn open_store(config: &AgentConfig) -> Result<SqliteTool, AgentError> {
    SqliteTool::open(
        &config.paths.db_path,
        Duration::from_secs(config.agent.sql_timeout_secs),
    )
}

fn run_batch(explicit: Option<&Path>, cwd: &Path, args: RunCli) -> Result<(), AgentError> {
    let mut config = load_config(explicit, cwd, cli::overrides(&args.paths, Some(&args.model)))?;
    if args.repair_hint {
        config.agent.repair_with_error_hint = true;
    }

    println!("Using DB path: {}", config.paths.db_path.display());
    println!("Using docs dir: {}", config.paths.docs_dir.display());

    let records = batch::load_jsonl(&args.batch)?;
    let trace: Arc<dyn TraceSink> = match &args.trace {
        Some(path) => Arc::new(JsonlTrace::create(path)?),
        None => Arc::new(NullTrace),
    };
    let model: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(config.model.clone()));
    let agent = HybridAgent::build(&config, model, trace)?;
    tracing::info!(
        run_id = agent.run_id(),
        questions = records.len(),
        jobs = args.jobs,
        "starting batch"
    );

    let outputs = batch::run_batch(&agent, &records, args.jobs, config.agent.explanation_chars)?;
    batch::write_jsonl(&args.out, &outputs)?;

    println!(
        "{} Wrote {} answers to {}",
        "✓".bright_green(),
        outputs.len(),
        args.out.display()
    );
    Ok(())
}

fn run_tune(explicit: Option<&Path>, cwd: &Path, args: TuneCli) -> Result<(), AgentError> {
    let config = load_config(explicit, cwd, cli::overrides(&args.paths, Some(&args.model)))?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| config.paths.tuned_nl2sql.clone());

    let examples = tuning::load_examples(&args.train)?;
    let store = open_store(&config)?;
    let schema = store.get_schema_str()?;

    let model: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(config.model.clone()));
    let model_id = model.model_id();
    let settings = tuning::BootstrapSettings {
        max_bootstrapped_demos: args.max_bootstrapped_demos,
        max_labeled_demos: args.max_labeled_demos,
        max_errors: args.max_errors,
    };
    let report = tuning::tune(
        QueryBuilder::new(model),
        &examples,
        &schema,
        settings,
        &model_id,
        &out,
    )?;

    let payload = serde_json::json!({
        "cmd": "tune",
        "status": "ok",
        "artifact": out.display().to_string(),
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
