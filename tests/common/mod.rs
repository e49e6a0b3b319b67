#![allow(dead_code)]

use hybridqa::agent::graph::{AgentParts, HybridAgent};
use hybridqa::agent::nl2sql::TunedProgram;
use hybridqa::agent::state::QuestionRecord;
use hybridqa::core::config::LoopConfig;
use hybridqa::core::db::SqliteTool;
use hybridqa::core::error::AgentError;
use hybridqa::core::llm::{LanguageModel, Prompt};
use hybridqa::core::trace::{NullTrace, TraceSink};
use hybridqa::rag::retrieval::CorpusIndex;
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Replays queued replies per signature, then a fixed reply if one is set.
/// Counts and records every call.
#[derive(Default)]
pub struct ScriptedModel {
    queued: Mutex<HashMap<&'static str, VecDeque<String>>>,
    fixed: HashMap<&'static str, String>,
    calls: Mutex<HashMap<String, usize>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `signature`.
    pub fn then(self, signature: &'static str, reply: &str) -> Self {
        self.queued
            .lock()
            .expect("queue lock")
            .entry(signature)
            .or_default()
            .push_back(reply.to_string());
        self
    }

    /// Reply used once the queue for `signature` is empty.
    pub fn always(mut self, signature: &'static str, reply: &str) -> Self {
        self.fixed.insert(signature, reply.to_string());
        self
    }

    pub fn calls(&self, signature: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(signature)
            .copied()
            .unwrap_or(0)
    }

    pub fn prompts(&self, signature: &str) -> Vec<Prompt> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .iter()
            .filter(|p| p.signature == signature)
            .cloned()
            .collect()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, prompt: &Prompt) -> Result<String, AgentError> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(prompt.signature.to_string())
            .or_insert(0) += 1;
        self.prompts.lock().expect("prompts lock").push(prompt.clone());

        let queued = self
            .queued
            .lock()
            .expect("queue lock")
            .get_mut(prompt.signature)
            .and_then(VecDeque::pop_front);
        queued
            .or_else(|| self.fixed.get(prompt.signature).cloned())
            .ok_or_else(|| {
                AgentError::LanguageModel(format!("no scripted reply for {}", prompt.signature))
            })
    }

    fn model_id(&self) -> String {
        "scripted".to_string()
    }
}

pub const TOP3_SQL: &str = "SELECT p.ProductName AS product, SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS revenue \
FROM \"Order Details\" od JOIN Products p ON p.ProductID = od.ProductID \
GROUP BY p.ProductName ORDER BY revenue DESC LIMIT 3";

pub const BAD_SQL: &str = "SELECT Revenue FROM Sales";

pub fn sql_reply(sql: &str) -> String {
    serde_json::json!({ "sql": sql }).to_string()
}

pub fn synth_reply(answer: &str, confidence: f64) -> String {
    serde_json::json!({
        "answer_text": answer,
        "explanation": "Computed from the query result.",
        "confidence": confidence,
    })
    .to_string()
}

/// Throwaway Northwind-style database plus a small markdown corpus.
pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("northwind.sqlite");
    let conn = Connection::open(&db_path).expect("open fixture db");
    conn.execute_batch(
        "CREATE TABLE Categories (CategoryID INTEGER PRIMARY KEY, CategoryName TEXT);
         CREATE TABLE Customers (CustomerID TEXT PRIMARY KEY, CompanyName TEXT);
         CREATE TABLE Products (ProductID INTEGER PRIMARY KEY, ProductName TEXT, CategoryID INTEGER, UnitPrice REAL);
         CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT);
         CREATE TABLE \"Order Details\" (OrderID INTEGER, ProductID INTEGER, UnitPrice REAL, Quantity INTEGER, Discount REAL);
         INSERT INTO Categories VALUES (1, 'Beverages'), (2, 'Condiments'), (8, 'Seafood');
         INSERT INTO Customers VALUES ('VINET', 'Vins et alcools Chevalier'), ('TOMSP', 'Toms Spezialitäten'), ('HANAR', 'Hanari Carnes');
         INSERT INTO Products VALUES (1, 'Chai', 1, 18.0), (2, 'Chang', 1, 19.0), (3, 'Aniseed Syrup', 2, 10.0), (4, 'Ikura', 8, 31.0);
         INSERT INTO Orders VALUES (10248, 'VINET', '1997-06-15'), (10249, 'TOMSP', '1997-07-10'), (10250, 'HANAR', '1996-12-05');
         INSERT INTO \"Order Details\" VALUES
            (10248, 1, 18.0, 10, 0.0),
            (10248, 4, 31.0, 5, 0.0),
            (10249, 2, 19.0, 20, 0.0),
            (10250, 3, 10.0, 6, 0.0),
            (10250, 1, 18.0, 2, 0.0);",
    )
    .expect("seed fixture db");
    drop(conn);

    let docs_dir = dir.path().join("docs");
    fs::create_dir_all(&docs_dir).expect("create docs dir");
    fs::write(
        docs_dir.join("product_policy.md"),
        "# Returns & Policy\n- Perishables (Produce, Seafood, Dairy): 3-5 days.\n- Beverages unopened: 14 days; opened: no returns.\n- Non-perishables: 30 days.\n",
    )
    .expect("write policy doc");
    fs::write(
        docs_dir.join("marketing_calendar.md"),
        "# Northwind Marketing Calendar (1997)\n## Summer Beverages 1997\n- Dates: 1997-06-01 to 1997-06-30\n- Notes: Focus on Beverages and Condiments.\n## Winter Classics 1997\n- Dates: 1997-12-01 to 1997-12-31\n",
    )
    .expect("write calendar doc");
    fs::write(
        docs_dir.join("kpi_definitions.md"),
        "# KPI Definitions\n## Average Order Value (AOV)\n- AOV = SUM(UnitPrice * Quantity * (1 - Discount)) / COUNT(DISTINCT OrderID)\n## Gross Margin\n- GM = SUM((UnitPrice - CostOfGoods) * Quantity * (1 - Discount))\n",
    )
    .expect("write kpi doc");

    Fixture {
        dir,
        db_path,
        docs_dir,
    }
}

pub fn agent_with(
    fx: &Fixture,
    model: Arc<ScriptedModel>,
    settings: LoopConfig,
    tuned: Option<TunedProgram>,
    trace: Arc<dyn TraceSink>,
) -> HybridAgent {
    let store = SqliteTool::open(&fx.db_path, Duration::from_secs(5)).expect("open store");
    let index = CorpusIndex::from_dir(&fx.docs_dir, 400).expect("index corpus");
    HybridAgent::from_parts(AgentParts {
        model,
        retriever: Arc::new(index),
        store: Arc::new(store),
        tuned,
        settings,
        top_k: 4,
        trace,
    })
    .expect("build agent")
}

pub fn agent(fx: &Fixture, model: Arc<ScriptedModel>) -> HybridAgent {
    agent_with(fx, model, LoopConfig::default(), None, Arc::new(NullTrace))
}

pub fn question(id: &str, question: &str, format_hint: &str) -> QuestionRecord {
    QuestionRecord {
        id: id.to_string(),
        question: question.to_string(),
        format_hint: format_hint.to_string(),
    }
}
