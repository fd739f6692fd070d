//! Experiment orchestration.
//!
//! An [`Experiment`] drives one retrieval strategy through a full
//! benchmark cycle against a vector store:
//!
//! 1. `setup` - encode the corpus once per declared space, register the
//!    collection, and bulk-upload every record as a point
//! 2. `run` - encode the queries, execute one search per query, and score
//!    the assembled run against the dataset's relevance judgments
//! 3. `clear` - drop the collection
//!
//! Construction fails fast when the strategy declares a vector space the
//! encoder set does not cover, before anything reaches the store. Queries
//! are processed sequentially; each search is a pure read of the indexed
//! collection, so `run` never mutates store state. The harness assumes
//! `setup` and `run` do not overlap on the same collection.

use std::collections::BTreeMap;

use crate::dataset::DatasetBundle;
use crate::embedding::{DenseEncoder, EncoderSet, LateInteractionEncoder, SparseEncoder};
use crate::error::{Error, Result};
use crate::evaluation::{evaluate, Metric, Qrels, Run};
use crate::store::{FusionAlgorithm, VectorStore};
use crate::strategy::points::RecordEmbeddings;
use crate::strategy::{QueryEmbeddings, SearchStrategy};

/// Knobs for one evaluation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Results requested per query.
    pub top_k: usize,
    /// Metrics to report.
    pub metrics: Vec<Metric>,
    /// Prefetch width multiplier for multi-stage strategies: each branch
    /// retrieves `top_k * scale_factor` candidates. Required by the hybrid
    /// strategies; there is no implicit default.
    pub scale_factor: Option<usize>,
    /// Fusion algorithm, required by the hybrid-fusion strategy.
    pub fusion: Option<FusionAlgorithm>,
}

impl RunOptions {
    pub fn new(top_k: usize, metrics: Vec<Metric>) -> Self {
        Self {
            top_k,
            metrics,
            scale_factor: None,
            fusion: None,
        }
    }

    /// Set the prefetch width multiplier.
    pub fn with_scale_factor(mut self, scale_factor: usize) -> Self {
        self.scale_factor = Some(scale_factor);
        self
    }

    /// Set the fusion algorithm.
    pub fn with_fusion(mut self, fusion: FusionAlgorithm) -> Self {
        self.fusion = Some(fusion);
        self
    }
}

/// One benchmark experiment: a strategy bound to a collection name, a
/// dataset slice, and the encoders covering the strategy's spaces.
pub struct Experiment<S: VectorStore> {
    strategy: SearchStrategy<S>,
    collection: String,
    dataset: DatasetBundle,
    encoders: EncoderSet,
    qrels: Qrels,
}

impl<S: VectorStore> std::fmt::Debug for Experiment<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl<S: VectorStore> Experiment<S> {
    /// Bind a strategy, dataset, and encoder set to a collection name.
    ///
    /// Fails with [`Error::MissingEmbedder`] when the strategy declares a
    /// space without a matching encoder, so a misconfigured experiment
    /// never touches the store.
    pub fn new(
        strategy: SearchStrategy<S>,
        collection: impl Into<String>,
        dataset: DatasetBundle,
        encoders: EncoderSet,
    ) -> Result<Self> {
        let schema = strategy.schema();
        if schema.dense.is_some() && encoders.dense.is_none() {
            return Err(Error::MissingEmbedder("dense"));
        }
        if schema.sparse.is_some() && encoders.sparse.is_none() {
            return Err(Error::MissingEmbedder("sparse"));
        }
        if schema.rerank.is_some() && encoders.late.is_none() {
            return Err(Error::MissingEmbedder("late-interaction"));
        }
        let qrels = Qrels::from_rows(&dataset.qrels);
        Ok(Self {
            strategy,
            collection: collection.into(),
            dataset,
            encoders,
            qrels,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dataset(&self) -> &DatasetBundle {
        &self.dataset
    }

    pub fn qrels(&self) -> &Qrels {
        &self.qrels
    }

    pub fn strategy(&self) -> &SearchStrategy<S> {
        &self.strategy
    }

    /// Encode the corpus once per declared space, register the collection,
    /// and upload every record. Returns the number of points uploaded.
    ///
    /// There is no rollback: on failure the collection may already exist
    /// and hold a subset of the points, and the caller must [`clear`] it
    /// before retrying.
    ///
    /// [`clear`]: Experiment::clear
    pub fn setup(&self) -> Result<usize> {
        let texts: Vec<&str> = self.dataset.corpus.iter().map(|r| r.text.as_str()).collect();
        let schema = self.strategy.schema();

        let mut embeddings = RecordEmbeddings::new();
        if schema.dense.is_some() {
            let encoder = self.dense_encoder()?;
            tracing::info!("encoding {} corpus texts with {}", texts.len(), encoder.name());
            embeddings = embeddings.with_dense(encoder.encode(&texts)?);
        }
        if schema.sparse.is_some() {
            let encoder = self.sparse_encoder()?;
            tracing::info!("encoding {} corpus texts with {}", texts.len(), encoder.name());
            embeddings = embeddings.with_sparse(encoder.encode(&texts)?);
        }
        if schema.rerank.is_some() {
            let encoder = self.late_encoder()?;
            tracing::info!("encoding {} corpus texts with {}", texts.len(), encoder.name());
            embeddings = embeddings.with_multi(encoder.encode(&texts)?);
        }

        self.strategy.create_collection(&self.collection)?;
        let uploaded =
            self.strategy
                .upload_records(&self.collection, &self.dataset.corpus, embeddings)?;
        tracing::info!("indexed {} points into '{}'", uploaded, self.collection);
        Ok(uploaded)
    }

    /// Encode the queries, search each one, and score the assembled run
    /// against the dataset's judgments. Returns metric name to averaged
    /// score.
    ///
    /// The search options are resolved up front from the strategy kind, so
    /// a multi-stage strategy missing its scale factor or fusion algorithm
    /// fails before any encoding happens.
    pub fn run(&self, options: &RunOptions) -> Result<BTreeMap<String, f64>> {
        let search_options =
            self.strategy
                .kind()
                .options(options.top_k, options.scale_factor, options.fusion)?;

        let texts: Vec<&str> = self.dataset.queries.iter().map(|r| r.text.as_str()).collect();
        let schema = self.strategy.schema();
        let dense = match &schema.dense {
            Some(space) => Some(checked(
                &space.name,
                texts.len(),
                self.dense_encoder()?.encode(&texts)?,
            )?),
            None => None,
        };
        let sparse = match &schema.sparse {
            Some(space) => Some(checked(
                &space.name,
                texts.len(),
                self.sparse_encoder()?.encode(&texts)?,
            )?),
            None => None,
        };
        let multi = match &schema.rerank {
            Some(space) => Some(checked(
                &space.name,
                texts.len(),
                self.late_encoder()?.encode(&texts)?,
            )?),
            None => None,
        };

        let mut run = Run::new();
        for (i, query) in self.dataset.queries.iter().enumerate() {
            let mut embeddings = QueryEmbeddings::new();
            if let Some(stream) = &dense {
                embeddings = embeddings.with_dense(stream[i].clone());
            }
            if let Some(stream) = &sparse {
                embeddings = embeddings.with_sparse(stream[i].clone());
            }
            if let Some(stream) = &multi {
                embeddings = embeddings.with_multi(stream[i].clone());
            }
            let hits = self.strategy.search(&self.collection, &embeddings, &search_options)?;
            run.insert_query(query.id.clone(), &hits);
        }
        tracing::info!(
            "searched {} queries against '{}' with the {} strategy",
            run.len(),
            self.collection,
            self.strategy.kind()
        );

        Ok(evaluate(&self.qrels, &run, &options.metrics))
    }

    /// Drop the collection, returning the store's acknowledgement.
    pub fn clear(&self) -> Result<bool> {
        let deleted = self.strategy.delete_collection(&self.collection)?;
        tracing::info!("cleared collection '{}'", self.collection);
        Ok(deleted)
    }

    fn dense_encoder(&self) -> Result<&dyn DenseEncoder> {
        self.encoders
            .dense
            .as_deref()
            .ok_or(Error::MissingEmbedder("dense"))
    }

    fn sparse_encoder(&self) -> Result<&dyn SparseEncoder> {
        self.encoders
            .sparse
            .as_deref()
            .ok_or(Error::MissingEmbedder("sparse"))
    }

    fn late_encoder(&self) -> Result<&dyn LateInteractionEncoder> {
        self.encoders
            .late
            .as_deref()
            .ok_or(Error::MissingEmbedder("late-interaction"))
    }
}

/// An encoder must return exactly one embedding per input text; anything
/// else would silently skew the query-to-embedding pairing.
fn checked<T>(space: &str, expected: usize, stream: Vec<T>) -> Result<Vec<T>> {
    if stream.len() != expected {
        return Err(Error::Alignment {
            space: space.to_string(),
            expected,
            actual: stream.len(),
        });
    }
    Ok(stream)
}
