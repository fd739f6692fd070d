//! Command-line interface
//!
//! Provides CLI commands for running retrieval benchmarks and inspecting
//! dataset slices. Commands run against the bundled in-memory store with
//! the deterministic hashing encoders, so a benchmark cycle needs no
//! external services.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dataset::load_dataset;
use crate::embedding::{
    EncoderSet, HashingDenseEncoder, HashingLateInteractionEncoder, HashingSparseEncoder,
};
use crate::evaluation::parse_metrics;
use crate::experiment::{Experiment, RunOptions};
use crate::store::{
    DenseSpace, FusionAlgorithm, InMemoryStore, MultiVectorSpace, SparseSpace,
};
use crate::strategy::{SearchStrategy, StrategyKind};

/// Everything one benchmark run reports, serialized by `--output`.
#[derive(Debug, Serialize)]
pub struct BenchmarkReport {
    pub strategy: String,
    pub collection: String,
    pub corpus_size: usize,
    pub query_size: usize,
    pub qrel_count: usize,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Execute the run command: a full setup / run / clear cycle.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    data: String,
    corpus_size: usize,
    query_size: usize,
    strategy: String,
    top_k: usize,
    scale_factor: Option<usize>,
    fusion: Option<String>,
    metrics: String,
    dimension: usize,
    collection: String,
    output: Option<String>,
    keep: bool,
) -> Result<()> {
    tracing::info!("Starting benchmark run");
    tracing::info!("  Dataset: {}", data);
    tracing::info!("  Strategy: {}", strategy);
    tracing::info!("  Top-k: {}", top_k);

    let kind: StrategyKind = strategy
        .parse()
        .context("unrecognized --strategy value")?;
    let fusion: Option<FusionAlgorithm> = match fusion {
        Some(name) => Some(name.parse().context("unrecognized --fusion value")?),
        None => None,
    };
    let metric_list = parse_metrics(&metrics).context("failed to parse --metrics")?;

    let dataset = load_dataset(Path::new(&data), corpus_size, query_size)
        .context(format!("failed to load dataset from {}", data))?;
    anyhow::ensure!(
        !dataset.is_empty(),
        "dataset slice is empty after pruning; increase --corpus-size / --query-size"
    );
    tracing::info!(
        "Loaded {} documents, {} queries, {} judgments after pruning",
        dataset.corpus.len(),
        dataset.queries.len(),
        dataset.qrels.len()
    );

    let store = InMemoryStore::new();
    let searcher = build_strategy(store, kind, dimension);
    let encoders = build_encoders(kind, dimension);

    let corpus_size = dataset.corpus.len();
    let query_size = dataset.queries.len();
    let qrel_count = dataset.qrels.len();

    let experiment = Experiment::new(searcher, collection.clone(), dataset, encoders)
        .context("failed to configure the experiment")?;

    let uploaded = experiment
        .setup()
        .context("setup failed; the collection may be partially populated, clear it before retrying")?;
    tracing::info!("Indexed {} points", uploaded);

    let mut options = RunOptions::new(top_k, metric_list);
    if let Some(scale) = scale_factor {
        options = options.with_scale_factor(scale);
    }
    if let Some(algorithm) = fusion {
        options = options.with_fusion(algorithm);
    }
    let scores = experiment.run(&options).context("benchmark run failed")?;

    if keep {
        tracing::info!("Keeping collection '{}' (--keep)", experiment.collection());
    } else {
        experiment.clear().context("failed to clear the collection")?;
    }

    println!("\nBenchmark Summary:");
    println!("  Strategy: {}", kind);
    println!("  Corpus: {} documents", corpus_size);
    println!("  Queries: {}", query_size);
    println!("  Top-k: {}", top_k);
    println!("  Scores:");
    for (name, score) in &scores {
        println!("    {:<14} {:.4}", name, score);
    }

    if let Some(path) = output {
        let report = BenchmarkReport {
            strategy: kind.to_string(),
            collection,
            corpus_size,
            query_size,
            qrel_count,
            top_k,
            scale_factor,
            fusion: fusion.map(|f| f.to_string()),
            metrics: scores,
            finished_at: chrono::Utc::now(),
        };
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json).context(format!("failed to write report to {}", path))?;
        println!("  Report: {}", path);
    }

    Ok(())
}

/// Execute the inspect command: load a dataset slice and report its shape.
pub async fn inspect(data: String, corpus_size: usize, query_size: usize) -> Result<()> {
    tracing::info!("Inspecting dataset at {}", data);

    let dataset = load_dataset(Path::new(&data), corpus_size, query_size)
        .context(format!("failed to load dataset from {}", data))?;

    println!("\nDataset Summary:");
    println!("  Directory: {}", data);
    println!("  Documents after pruning: {}", dataset.corpus.len());
    println!("  Queries after pruning: {}", dataset.queries.len());
    println!("  Relevance judgments: {}", dataset.qrels.len());
    if let Some(record) = dataset.corpus.first() {
        let preview: String = record.text.chars().take(80).collect();
        println!("  First document: {} \"{}\"", record.id, preview);
    }
    if let Some(record) = dataset.queries.first() {
        println!("  First query: {} \"{}\"", record.id, record.text);
    }

    Ok(())
}

/// Register the spaces the chosen strategy needs over the store.
fn build_strategy(
    store: InMemoryStore,
    kind: StrategyKind,
    dimension: usize,
) -> SearchStrategy<InMemoryStore> {
    let dense = || DenseSpace::new("dense", dimension);
    let sparse = || SparseSpace::new("sparse");
    let rerank = || MultiVectorSpace::new("rerank", dimension);
    match kind {
        StrategyKind::DenseOnly => SearchStrategy::dense_only(store, dense()),
        StrategyKind::SparseOnly => SearchStrategy::sparse_only(store, sparse()),
        StrategyKind::HybridFusion => SearchStrategy::hybrid_fusion(store, dense(), sparse()),
        StrategyKind::HybridRerank => {
            SearchStrategy::hybrid_rerank(store, dense(), sparse(), rerank())
        }
    }
}

/// Hashing encoders for exactly the spaces the strategy declares.
fn build_encoders(kind: StrategyKind, dimension: usize) -> EncoderSet {
    let mut encoders = EncoderSet::new();
    if kind.uses_dense() {
        encoders = encoders.with_dense(Arc::new(HashingDenseEncoder::new(dimension)));
    }
    if kind.uses_sparse() {
        encoders = encoders.with_sparse(Arc::new(HashingSparseEncoder::new()));
    }
    if kind.uses_rerank() {
        encoders = encoders.with_late(Arc::new(HashingLateInteractionEncoder::new(dimension)));
    }
    encoders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_get_exactly_the_encoders_they_declare() {
        let encoders = build_encoders(StrategyKind::DenseOnly, 16);
        assert!(encoders.dense.is_some());
        assert!(encoders.sparse.is_none());
        assert!(encoders.late.is_none());

        let encoders = build_encoders(StrategyKind::SparseOnly, 16);
        assert!(encoders.dense.is_none());
        assert!(encoders.sparse.is_some());

        let encoders = build_encoders(StrategyKind::HybridRerank, 16);
        assert!(encoders.dense.is_some());
        assert!(encoders.sparse.is_some());
        assert!(encoders.late.is_some());
    }

    #[test]
    fn built_strategies_declare_the_expected_spaces() {
        let searcher = build_strategy(InMemoryStore::new(), StrategyKind::HybridFusion, 32);
        let schema = searcher.schema();
        assert_eq!(schema.dense.as_ref().unwrap().dim, 32);
        assert!(schema.sparse.is_some());
        assert!(schema.rerank.is_none());

        let searcher = build_strategy(InMemoryStore::new(), StrategyKind::SparseOnly, 32);
        assert!(searcher.schema().dense.is_none());
    }
}
