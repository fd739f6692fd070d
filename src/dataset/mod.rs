//! Benchmark dataset loading.
//!
//! A dataset directory holds three files in the BeIR layout:
//!
//! - `corpus.jsonl` — one `{"_id": ..., "text": ...}` object per line
//! - `queries.jsonl` — same shape as the corpus
//! - `qrels.tsv` — tab-separated `query-id, corpus-id, score` judgments
//!
//! Loading caps the corpus and query tables at requested head counts,
//! then prunes all three tables down to their mutually reachable subset
//! so every retained judgment references a loaded document and query, and
//! every retained document and query carries at least one judgment.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One corpus document or benchmark query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One relevance judgment: how relevant a document is to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrelRow {
    pub query_id: String,
    pub corpus_id: String,
    pub score: u32,
}

/// The three pruned tables of a benchmark slice.
#[derive(Debug, Clone, Default)]
pub struct DatasetBundle {
    pub corpus: Vec<Record>,
    pub queries: Vec<Record>,
    pub qrels: Vec<QrelRow>,
}

impl DatasetBundle {
    /// Assemble a bundle, pruning in two passes: judgments referencing an
    /// unloaded document or query are dropped, then documents and queries
    /// without a surviving judgment are dropped. Input order is preserved.
    pub fn new(corpus: Vec<Record>, queries: Vec<Record>, qrels: Vec<QrelRow>) -> Self {
        let corpus_ids: HashSet<&str> = corpus.iter().map(|r| r.id.as_str()).collect();
        let query_ids: HashSet<&str> = queries.iter().map(|r| r.id.as_str()).collect();
        let qrels: Vec<QrelRow> = qrels
            .into_iter()
            .filter(|row| {
                corpus_ids.contains(row.corpus_id.as_str())
                    && query_ids.contains(row.query_id.as_str())
            })
            .collect();

        let judged_docs: HashSet<&str> = qrels.iter().map(|r| r.corpus_id.as_str()).collect();
        let judged_queries: HashSet<&str> = qrels.iter().map(|r| r.query_id.as_str()).collect();
        let corpus = corpus
            .into_iter()
            .filter(|r| judged_docs.contains(r.id.as_str()))
            .collect();
        let queries = queries
            .into_iter()
            .filter(|r| judged_queries.contains(r.id.as_str()))
            .collect();

        Self {
            corpus,
            queries,
            qrels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty() || self.queries.is_empty()
    }
}

#[derive(Deserialize)]
struct JsonRecord {
    #[serde(rename = "_id")]
    id: String,
    text: String,
}

fn dataset_error(path: &Path, message: impl Into<String>) -> Error {
    Error::Dataset {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Read up to `limit` records from a JSONL file. Extra fields such as the
/// BeIR `title` are ignored. Short files log a warning instead of failing
/// so small dataset slices stay usable.
fn read_records(path: &Path, limit: usize) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| dataset_error(path, e.to_string()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        if records.len() >= limit {
            break;
        }
        let line = line.map_err(|e| dataset_error(path, format!("line {}: {}", number + 1, e)))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: JsonRecord = serde_json::from_str(line)
            .map_err(|e| dataset_error(path, format!("line {}: {}", number + 1, e)))?;
        records.push(Record {
            id: row.id,
            text: row.text,
        });
    }
    if records.len() < limit {
        tracing::warn!(
            "{} has {} rows, fewer than the {} requested",
            path.display(),
            records.len(),
            limit
        );
    }
    Ok(records)
}

/// Read every judgment row from a TSV file, skipping an optional header.
fn read_qrels(path: &Path) -> Result<Vec<QrelRow>> {
    let file = File::open(path).map_err(|e| dataset_error(path, e.to_string()))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| dataset_error(path, format!("line {}: {}", number + 1, e)))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if number == 0 && (line.starts_with("query-id") || line.starts_with("query_id")) {
            continue;
        }
        let mut columns = line.split('\t');
        let (query_id, corpus_id, score) = match (columns.next(), columns.next(), columns.next())
        {
            (Some(q), Some(c), Some(s)) => (q, c, s),
            _ => {
                return Err(dataset_error(
                    path,
                    format!("line {}: expected 3 tab-separated columns", number + 1),
                ))
            }
        };
        let score: u32 = score.trim().parse().map_err(|_| {
            dataset_error(
                path,
                format!("line {}: relevance grade '{}' is not an integer", number + 1, score),
            )
        })?;
        rows.push(QrelRow {
            query_id: query_id.to_string(),
            corpus_id: corpus_id.to_string(),
            score,
        });
    }
    Ok(rows)
}

/// Load and prune a dataset directory, keeping at most `corpus_count`
/// corpus rows and `query_count` query rows before pruning.
pub fn load_dataset(dir: &Path, corpus_count: usize, query_count: usize) -> Result<DatasetBundle> {
    let corpus = read_records(&dir.join("corpus.jsonl"), corpus_count)?;
    let queries = read_records(&dir.join("queries.jsonl"), query_count)?;
    let qrels = read_qrels(&dir.join("qrels.tsv"))?;
    let bundle = DatasetBundle::new(corpus, queries, qrels);
    tracing::info!(
        "dataset pruned to {} corpus rows, {} queries, {} judgments",
        bundle.corpus.len(),
        bundle.queries.len(),
        bundle.qrels.len()
    );
    Ok(bundle)
}
