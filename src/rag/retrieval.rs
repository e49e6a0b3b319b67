//! Local document corpus with a TF-IDF similarity index.
//!
//! Markdown files under the docs directory are split into fixed-size
//! character chunks. Chunk ids are `<file stem>::chunk<n>` where `n` counts
//! across the whole corpus. Files are read in name order so ids and ranking
//! are stable for an unchanged directory.
//!
//! Weighting follows the usual smoothed scheme: `idf = ln((1 + N) / (1 + df)) + 1`,
//! raw term counts, L2-normalised vectors, cosine score via dot product.

use crate::core::error::AgentError;
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\w\w+\b").expect("token pattern is valid")
});

/// A retrieved unit of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f64,
}

pub trait Retriever: Send + Sync {
    /// Up to `top_k` fragments, highest score first.
    fn retrieve(&self, query: &str, top_k: usize) -> Vec<Fragment>;
}

#[derive(Debug, Clone)]
struct Chunk {
    id: String,
    source: String,
    text: String,
}

type SparseVec = Vec<(usize, f64)>;

pub struct CorpusIndex {
    chunks: Vec<Chunk>,
    vocabulary: FxHashMap<String, usize>,
    idf: Vec<f64>,
    vectors: Vec<SparseVec>,
}

impl CorpusIndex {
    /// Scan `docs_dir` for `.md` files. Zero documents is a fatal configuration error.
    pub fn from_dir(docs_dir: &Path, chunk_size: usize) -> Result<Self, AgentError> {
        if !docs_dir.is_dir() {
            return Err(AgentError::Corpus(format!(
                "docs directory not found: {}",
                docs_dir.display()
            )));
        }

        let mut paths: Vec<_> = fs::read_dir(docs_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("md"))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push((stem, fs::read_to_string(&path)?));
        }

        Self::from_documents(documents, chunk_size).map_err(|e| match e {
            AgentError::Corpus(_) => AgentError::Corpus(format!(
                "No .md docs found in {}",
                docs_dir.display()
            )),
            other => other,
        })
    }

    /// Build from `(source, content)` pairs.
    pub fn from_documents(
        documents: Vec<(String, String)>,
        chunk_size: usize,
    ) -> Result<Self, AgentError> {
        if chunk_size == 0 {
            return Err(AgentError::Config("chunk_size must be positive".to_string()));
        }

        let mut chunks = Vec::new();
        for (source, content) in documents {
            let chars: Vec<char> = content.chars().collect();
            for piece in chars.chunks(chunk_size) {
                chunks.push(Chunk {
                    id: format!("{}::chunk{}", source, chunks.len()),
                    source: source.clone(),
                    text: piece.iter().collect(),
                });
            }
        }
        if chunks.is_empty() {
            return Err(AgentError::Corpus("no documents to index".to_string()));
        }

        let counts: Vec<FxHashMap<String, u32>> =
            chunks.par_iter().map(|c| term_counts(&c.text)).collect();

        let mut vocabulary: FxHashMap<String, usize> = FxHashMap::default();
        let mut df: Vec<u32> = Vec::new();
        for doc in &counts {
            for term in doc.keys() {
                let next = vocabulary.len();
                let idx = *vocabulary.entry(term.clone()).or_insert(next);
                if idx == df.len() {
                    df.push(0);
                }
                df[idx] += 1;
            }
        }

        let n = chunks.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let vectors = counts
            .par_iter()
            .map(|doc| weigh(doc, &vocabulary, &idf))
            .collect();

        tracing::debug!(
            chunks = chunks.len(),
            terms = vocabulary.len(),
            "corpus index built"
        );

        Ok(Self {
            chunks,
            vocabulary,
            idf,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Retriever for CorpusIndex {
    fn retrieve(&self, query: &str, top_k: usize) -> Vec<Fragment> {
        let query_vec: FxHashMap<usize, f64> =
            weigh(&term_counts(query), &self.vocabulary, &self.idf)
                .into_iter()
                .collect();

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, vec)| {
                let score = vec
                    .iter()
                    .filter_map(|(term, w)| query_vec.get(term).map(|q| q * w))
                    .sum::<f64>();
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored
            .into_iter()
            .take(top_k)
            .map(|(idx, score)| {
                let chunk = &self.chunks[idx];
                Fragment {
                    id: chunk.id.clone(),
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect()
    }
}

fn term_counts(text: &str) -> FxHashMap<String, u32> {
    let lowered = text.to_lowercase();
    let mut counts = FxHashMap::default();
    for m in TOKEN_RE.find_iter(&lowered) {
        *counts.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

fn weigh(counts: &FxHashMap<String, u32>, vocabulary: &FxHashMap<String, usize>, idf: &[f64]) -> SparseVec {
    let mut vec: SparseVec = counts
        .iter()
        .filter_map(|(term, &c)| vocabulary.get(term).map(|&idx| (idx, c as f64 * idf[idx])))
        .collect();
    let norm = vec.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for entry in &mut vec {
            entry.1 /= norm;
        }
    }
    vec.sort_by_key(|(idx, _)| *idx);
    vec
}
