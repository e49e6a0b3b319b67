//! Question-answering agent: state, step functions and the orchestration graph.

pub mod answer;
pub mod batch;
pub mod executor;
pub mod format;
pub mod graph;
pub mod nl2sql;
pub mod planner;
pub mod router;
pub mod signature;
pub mod state;
pub mod synth;
pub mod tuning;
