//! # ragbench
//!
//! A benchmark harness for retrieval-augmented search: index a text corpus
//! into a vector store under one of several retrieval strategies, run a
//! query set against it, and score the produced rankings against human
//! relevance judgments.
//!
//! ## Overview
//!
//! Four retrieval strategies share one collection lifecycle and differ in
//! the vector spaces they register and the query shape they compose:
//!
//! - dense-only: single nearest-neighbor search in one dense space
//! - sparse-only: single dot-product search in one sparse space
//! - hybrid-fusion: dense and sparse prefetch branches fused by RRF or DBSF
//! - hybrid-rerank: prefetch union rescored with late-interaction MaxSim
//!
//! ## Architecture
//!
//! The harness is organized into modular components:
//!
//! - `dataset` - BeIR-layout corpus/query/qrels loading with pruning
//! - `embedding` - encoder capability traits and offline hashing encoders
//! - `store` - the vector-collection protocol and an in-memory backend
//! - `strategy` - the four retrieval strategies and point assembly
//! - `evaluation` - ranking metrics (nDCG, MRR, MAP, recall, ...)
//! - `experiment` - setup / run / clear orchestration
//! - `cli` - command-line interface

pub mod cli;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use dataset::{load_dataset, DatasetBundle, QrelRow, Record};
pub use error::{Error, Result};
pub use experiment::{Experiment, RunOptions};
pub use store::{InMemoryStore, VectorStore};
pub use strategy::{SearchStrategy, StrategyKind};
