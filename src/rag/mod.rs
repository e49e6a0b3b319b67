//! Document retrieval collaborator.

pub mod retrieval;
