//! CLI struct definitions for the hybridqa command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::config::Overrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "hybridqa",
    version = env!("CARGO_PKG_VERSION"),
    about = "Answer questions over a document corpus and a SQLite database with a local language model."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./hybridqa.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Debug-level diagnostics on stderr (RUST_LOG takes precedence).
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Answer every question in a JSONL batch and write JSONL answers
    Run(RunCli),
    /// Bootstrap a few-shot artifact for the query builder
    Tune(TuneCli),
    /// Print the database schema snapshot the agent sees
    Schema {
        #[clap(flatten)]
        paths: PathArgs,
    },
    /// Query the document index and print ranked fragments as JSON
    Search {
        /// Free-text query
        query: String,
        /// Number of fragments (defaults to retrieval.top_k)
        #[clap(long)]
        top_k: Option<usize>,
        #[clap(flatten)]
        paths: PathArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct PathArgs {
    /// SQLite database path
    #[clap(long)]
    pub db: Option<PathBuf>,
    /// Directory of .md documents
    #[clap(long)]
    pub docs: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct ModelArgs {
    /// Model name served by Ollama
    #[clap(long)]
    pub model: Option<String>,
    /// Ollama base URL
    #[clap(long)]
    pub endpoint: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Input JSONL: {id, question, format_hint} per line
    #[clap(long)]
    pub batch: PathBuf,
    /// Output JSONL, written once the whole batch is done
    #[clap(long)]
    pub out: PathBuf,
    /// Append one JSON line per graph transition to this file
    #[clap(long)]
    pub trace: Option<PathBuf>,
    /// Questions processed in parallel
    #[clap(long, default_value_t = 1)]
    pub jobs: usize,
    /// Feed the failed query and its error back into regeneration
    #[clap(long)]
    pub repair_hint: bool,
    #[clap(flatten)]
    pub paths: PathArgs,
    #[clap(flatten)]
    pub model: ModelArgs,
}

#[derive(clap::Args, Debug)]
pub(crate) struct TuneCli {
    /// Training JSONL: {question, sql, schema?, constraints_json?} per line
    #[clap(long)]
    pub train: PathBuf,
    /// Artifact path (defaults to paths.tuned_nl2sql)
    #[clap(long)]
    pub out: Option<PathBuf>,
    #[clap(long, default_value_t = 4)]
    pub max_bootstrapped_demos: usize,
    #[clap(long, default_value_t = 20)]
    pub max_labeled_demos: usize,
    #[clap(long, default_value_t = 5)]
    pub max_errors: usize,
    #[clap(flatten)]
    pub paths: PathArgs,
    #[clap(flatten)]
    pub model: ModelArgs,
}

pub(crate) fn overrides(paths: &PathArgs, model: Option<&ModelArgs>) -> Overrides {
    Overrides {
        db_path: paths.db.clone(),
        docs_dir: paths.docs.clone(),
        model: model.and_then(|m| m.model.clone()),
        endpoint: model.and_then(|m| m.endpoint.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_batch_and_out() {
        assert!(Cli::try_parse_from(["hybridqa", "run", "--batch", "in.jsonl"]).is_err());
        let cli = Cli::try_parse_from([
            "hybridqa", "run", "--batch", "in.jsonl", "--out", "out.jsonl", "--jobs", "4", "--db", "x.sqlite",
        ])
        .unwrap();
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.jobs, 4);
                assert_eq!(run.paths.db, Some(PathBuf::from("x.sqlite")));
                assert!(!run.repair_hint);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["hybridqa", "schema", "--config", "c.toml", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn tune_defaults() {
        let cli = Cli::try_parse_from(["hybridqa", "tune", "--train", "t.jsonl"]).unwrap();
        let Command::Tune(tune) = cli.command else {
            panic!("expected tune");
        };
        assert_eq!(tune.max_bootstrapped_demos, 4);
        assert_eq!(tune.max_labeled_demos, 20);
        assert_eq!(tune.max_errors, 5);
    }
}
