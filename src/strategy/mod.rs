//! Retrieval strategies.
//!
//! Four strategies share one lifecycle against a vector store — register a
//! collection schema, bulk-upload embedded records, execute searches — and
//! differ only in the spaces they register and the query shape they
//! compose:
//!
//! - `dense`: single nearest-neighbor query in the dense space
//! - `sparse`: single dot-product query in the sparse space
//! - `hybrid-fusion`: dense and sparse prefetch branches fused into one
//!   ranking by RRF or DBSF
//! - `hybrid-rerank`: dense and sparse prefetch branches unioned, then
//!   rescored with MaxSim in a multi-vector space
//!
//! Multi-stage strategies widen recall by prefetching `top_k * scale`
//! candidates per branch before cutting back to `top_k` at the final
//! stage.

pub mod points;

use std::fmt;
use std::str::FromStr;

use crate::dataset::Record;
use crate::embedding::{DenseVector, MultiVector, SparseVector};
use crate::error::{Error, Result};
use crate::store::{
    CollectionSchema, DenseSpace, FusionAlgorithm, MultiVectorSpace, Prefetch, QueryRequest,
    QueryVector, ScoredPoint, SparseSpace, UploadOptions, VectorStore,
};

use points::{build_points, RecordEmbeddings};

/// HNSW search-breadth hint sent with every dense query stage.
pub const DENSE_SEARCH_EF: usize = 128;
/// Upload batch size for the reranking strategy's token-matrix points.
pub const RERANK_UPLOAD_BATCH_SIZE: usize = 20;
/// Upload concurrency for the reranking strategy.
pub const RERANK_UPLOAD_CONCURRENCY: usize = 6;

/// The four supported retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    DenseOnly,
    SparseOnly,
    HybridFusion,
    HybridRerank,
}

impl StrategyKind {
    pub fn uses_dense(&self) -> bool {
        !matches!(self, StrategyKind::SparseOnly)
    }

    pub fn uses_sparse(&self) -> bool {
        !matches!(self, StrategyKind::DenseOnly)
    }

    pub fn uses_rerank(&self) -> bool {
        matches!(self, StrategyKind::HybridRerank)
    }

    /// Whether searches prefetch wider than their final result list.
    pub fn is_multi_stage(&self) -> bool {
        matches!(self, StrategyKind::HybridFusion | StrategyKind::HybridRerank)
    }

    /// Resolve user-level knobs into the options this strategy executes.
    ///
    /// Single-stage strategies ignore the multi-stage knobs; multi-stage
    /// strategies fail fast when a knob they depend on is absent instead
    /// of substituting a default.
    pub fn options(
        &self,
        top_k: usize,
        scale_factor: Option<usize>,
        fusion: Option<FusionAlgorithm>,
    ) -> Result<SearchOptions> {
        if top_k == 0 {
            return Err(Error::InvalidOptions("top_k must be at least 1".to_string()));
        }
        match self {
            StrategyKind::DenseOnly | StrategyKind::SparseOnly => {
                Ok(SearchOptions::TopK { limit: top_k })
            }
            StrategyKind::HybridFusion => {
                let scale = require_scale(scale_factor)?;
                let algorithm = fusion.ok_or_else(|| {
                    Error::InvalidOptions(
                        "hybrid-fusion requires a fusion algorithm (rrf or dbsf)".to_string(),
                    )
                })?;
                Ok(SearchOptions::PrefetchFuse {
                    limit: top_k,
                    prefetch_limit: top_k * scale,
                    algorithm,
                })
            }
            StrategyKind::HybridRerank => {
                let scale = require_scale(scale_factor)?;
                Ok(SearchOptions::PrefetchRerank {
                    limit: top_k,
                    prefetch_limit: top_k * scale,
                })
            }
        }
    }
}

fn require_scale(scale_factor: Option<usize>) -> Result<usize> {
    match scale_factor {
        Some(scale) if scale >= 1 => Ok(scale),
        Some(_) => Err(Error::InvalidOptions(
            "scale factor must be at least 1".to_string(),
        )),
        None => Err(Error::InvalidOptions(
            "multi-stage strategies require a prefetch scale factor".to_string(),
        )),
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dense" => Ok(StrategyKind::DenseOnly),
            "sparse" => Ok(StrategyKind::SparseOnly),
            "hybrid-fusion" => Ok(StrategyKind::HybridFusion),
            "hybrid-rerank" => Ok(StrategyKind::HybridRerank),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::DenseOnly => "dense",
            StrategyKind::SparseOnly => "sparse",
            StrategyKind::HybridFusion => "hybrid-fusion",
            StrategyKind::HybridRerank => "hybrid-rerank",
        };
        write!(f, "{name}")
    }
}

/// Query-side embeddings for one query, one slot per space kind.
#[derive(Debug, Clone, Default)]
pub struct QueryEmbeddings {
    pub dense: Option<DenseVector>,
    pub sparse: Option<SparseVector>,
    pub multi: Option<MultiVector>,
}

impl QueryEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dense(mut self, vector: DenseVector) -> Self {
        self.dense = Some(vector);
        self
    }

    pub fn with_sparse(mut self, vector: SparseVector) -> Self {
        self.sparse = Some(vector);
        self
    }

    pub fn with_multi(mut self, matrix: MultiVector) -> Self {
        self.multi = Some(matrix);
        self
    }
}

/// Execution knobs for one search, shaped to the strategy that runs it.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOptions {
    /// Single-stage: return the best `limit` hits.
    TopK { limit: usize },
    /// Prefetch `prefetch_limit` per branch, fuse, cut back to `limit`.
    PrefetchFuse {
        limit: usize,
        prefetch_limit: usize,
        algorithm: FusionAlgorithm,
    },
    /// Prefetch `prefetch_limit` per branch, rescore the union with
    /// MaxSim, cut back to `limit`.
    PrefetchRerank { limit: usize, prefetch_limit: usize },
}

impl SearchOptions {
    pub fn limit(&self) -> usize {
        match self {
            SearchOptions::TopK { limit } => *limit,
            SearchOptions::PrefetchFuse { limit, .. } => *limit,
            SearchOptions::PrefetchRerank { limit, .. } => *limit,
        }
    }
}

/// A retrieval strategy bound to a vector store.
///
/// The strategy owns the collection schema it registers, so uploads and
/// searches always address the spaces consistently.
pub struct SearchStrategy<S> {
    store: S,
    kind: StrategyKind,
    schema: CollectionSchema,
}

impl<S: VectorStore> SearchStrategy<S> {
    pub fn dense_only(store: S, dense: DenseSpace) -> Self {
        Self {
            store,
            kind: StrategyKind::DenseOnly,
            schema: CollectionSchema {
                dense: Some(dense),
                sparse: None,
                rerank: None,
            },
        }
    }

    pub fn sparse_only(store: S, sparse: SparseSpace) -> Self {
        Self {
            store,
            kind: StrategyKind::SparseOnly,
            schema: CollectionSchema {
                dense: None,
                sparse: Some(sparse),
                rerank: None,
            },
        }
    }

    pub fn hybrid_fusion(store: S, dense: DenseSpace, sparse: SparseSpace) -> Self {
        Self {
            store,
            kind: StrategyKind::HybridFusion,
            schema: CollectionSchema {
                dense: Some(dense),
                sparse: Some(sparse),
                rerank: None,
            },
        }
    }

    pub fn hybrid_rerank(
        store: S,
        dense: DenseSpace,
        sparse: SparseSpace,
        rerank: MultiVectorSpace,
    ) -> Self {
        Self {
            store,
            kind: StrategyKind::HybridRerank,
            schema: CollectionSchema {
                dense: Some(dense),
                sparse: Some(sparse),
                rerank: Some(rerank),
            },
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_collection(&self, name: &str) -> Result<bool> {
        tracing::debug!("registering collection '{}' for the {} strategy", name, self.kind);
        self.store.create_collection(name, &self.schema)
    }

    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        self.store.delete_collection(name)
    }

    /// Assemble records and their embedding streams into points and upload
    /// them. Returns the number of points uploaded.
    pub fn upload_records(
        &self,
        name: &str,
        records: &[Record],
        embeddings: RecordEmbeddings,
    ) -> Result<usize> {
        let points = build_points(&self.schema, records, embeddings)?;
        let count = points.len();
        let options = self.upload_options();
        tracing::debug!(
            "uploading {} points to '{}' (batch {:?}, concurrency {})",
            count,
            name,
            options.batch_size,
            options.concurrency
        );
        self.store.upload_points(name, points, &options)?;
        Ok(count)
    }

    fn upload_options(&self) -> UploadOptions {
        match self.kind {
            // token matrices are an order of magnitude heavier than single
            // vectors, so they go up in small concurrent batches
            StrategyKind::HybridRerank => UploadOptions {
                batch_size: Some(RERANK_UPLOAD_BATCH_SIZE),
                concurrency: RERANK_UPLOAD_CONCURRENCY,
            },
            _ => UploadOptions::default(),
        }
    }

    /// Compose the strategy's query shape and execute it.
    pub fn search(
        &self,
        name: &str,
        query: &QueryEmbeddings,
        options: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        let request = self.compose_request(query, options)?;
        self.store.query(name, &request)
    }

    fn compose_request(
        &self,
        query: &QueryEmbeddings,
        options: &SearchOptions,
    ) -> Result<QueryRequest> {
        match (self.kind, options) {
            (StrategyKind::DenseOnly, SearchOptions::TopK { limit }) => Ok(QueryRequest::Single {
                space: self.dense_name()?.to_string(),
                vector: QueryVector::Dense(require_dense(query)?.clone()),
                limit: *limit,
                hnsw_ef: Some(DENSE_SEARCH_EF),
            }),
            (StrategyKind::SparseOnly, SearchOptions::TopK { limit }) => {
                Ok(QueryRequest::Single {
                    space: self.sparse_name()?.to_string(),
                    vector: QueryVector::Sparse(require_sparse(query)?.clone()),
                    limit: *limit,
                    hnsw_ef: None,
                })
            }
            (
                StrategyKind::HybridFusion,
                SearchOptions::PrefetchFuse {
                    limit,
                    prefetch_limit,
                    algorithm,
                },
            ) => Ok(QueryRequest::Fused {
                prefetch: self.hybrid_prefetch(query, *prefetch_limit)?,
                algorithm: *algorithm,
                limit: *limit,
            }),
            (
                StrategyKind::HybridRerank,
                SearchOptions::PrefetchRerank {
                    limit,
                    prefetch_limit,
                },
            ) => Ok(QueryRequest::Reranked {
                prefetch: self.hybrid_prefetch(query, *prefetch_limit)?,
                space: self.rerank_name()?.to_string(),
                query: require_multi(query)?.clone(),
                limit: *limit,
            }),
            (kind, options) => Err(Error::InvalidOptions(format!(
                "the {kind} strategy cannot execute {options:?}"
            ))),
        }
    }

    /// The two recall branches every hybrid strategy shares.
    fn hybrid_prefetch(&self, query: &QueryEmbeddings, limit: usize) -> Result<Vec<Prefetch>> {
        Ok(vec![
            Prefetch {
                space: self.dense_name()?.to_string(),
                vector: QueryVector::Dense(require_dense(query)?.clone()),
                limit,
                hnsw_ef: Some(DENSE_SEARCH_EF),
            },
            Prefetch {
                space: self.sparse_name()?.to_string(),
                vector: QueryVector::Sparse(require_sparse(query)?.clone()),
                limit,
                hnsw_ef: None,
            },
        ])
    }

    fn dense_name(&self) -> Result<&str> {
        self.schema
            .dense
            .as_ref()
            .map(|s| s.name.as_str())
            .ok_or_else(|| Error::SchemaMismatch("strategy registers no dense space".to_string()))
    }

    fn sparse_name(&self) -> Result<&str> {
        self.schema
            .sparse
            .as_ref()
            .map(|s| s.name.as_str())
            .ok_or_else(|| Error::SchemaMismatch("strategy registers no sparse space".to_string()))
    }

    fn rerank_name(&self) -> Result<&str> {
        self.schema
            .rerank
            .as_ref()
            .map(|s| s.name.as_str())
            .ok_or_else(|| {
                Error::SchemaMismatch("strategy registers no multi-vector space".to_string())
            })
    }
}

fn require_dense(query: &QueryEmbeddings) -> Result<&DenseVector> {
    query
        .dense
        .as_ref()
        .ok_or_else(|| Error::SchemaMismatch("query has no dense embedding".to_string()))
}

fn require_sparse(query: &QueryEmbeddings) -> Result<&SparseVector> {
    query
        .sparse
        .as_ref()
        .ok_or_else(|| Error::SchemaMismatch("query has no sparse embedding".to_string()))
}

fn require_multi(query: &QueryEmbeddings) -> Result<&MultiVector> {
    query
        .multi
        .as_ref()
        .ok_or_else(|| Error::SchemaMismatch("query has no late-interaction embedding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Distance, InMemoryStore};

    fn dense_space() -> DenseSpace {
        DenseSpace::new("dense", 2).with_metric(Distance::Dot)
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("doc{i}"), format!("text {i}")))
            .collect()
    }

    fn sparse(index: u32, value: f32) -> SparseVector {
        SparseVector::new(vec![index], vec![value])
    }

    fn ids(hits: &[ScoredPoint]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn strategy_names_round_trip() {
        for name in ["dense", "sparse", "hybrid-fusion", "hybrid-rerank"] {
            let kind: StrategyKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!(matches!(
            "bm25".parse::<StrategyKind>(),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn options_scale_the_prefetch_limit() {
        let options = StrategyKind::HybridRerank.options(10, Some(4), None).unwrap();
        assert_eq!(
            options,
            SearchOptions::PrefetchRerank {
                limit: 10,
                prefetch_limit: 40,
            }
        );
        assert_eq!(options.limit(), 10);
    }

    #[test]
    fn multi_stage_options_fail_without_their_knobs() {
        let err = StrategyKind::HybridFusion
            .options(10, Some(2), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = StrategyKind::HybridFusion
            .options(10, None, Some(FusionAlgorithm::Rrf))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = StrategyKind::HybridRerank.options(10, None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = StrategyKind::DenseOnly.options(0, None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn single_stage_options_ignore_multi_stage_knobs() {
        let options = StrategyKind::DenseOnly
            .options(5, Some(9), Some(FusionAlgorithm::Dbsf))
            .unwrap();
        assert_eq!(options, SearchOptions::TopK { limit: 5 });
    }

    #[test]
    fn kind_predicates_match_registered_spaces() {
        assert!(StrategyKind::DenseOnly.uses_dense());
        assert!(!StrategyKind::DenseOnly.uses_sparse());
        assert!(!StrategyKind::SparseOnly.uses_dense());
        assert!(StrategyKind::HybridFusion.is_multi_stage());
        assert!(StrategyKind::HybridRerank.uses_rerank());
        assert!(!StrategyKind::SparseOnly.is_multi_stage());
    }

    #[test]
    fn dense_strategy_searches_sorted_within_limit() {
        let strategy = SearchStrategy::dense_only(InMemoryStore::new(), dense_space());
        strategy.create_collection("t").unwrap();
        let embeddings = RecordEmbeddings::new().with_dense(vec![
            vec![1.0, 0.0],
            vec![0.8, 0.0],
            vec![0.2, 0.0],
        ]);
        let uploaded = strategy.upload_records("t", &records(3), embeddings).unwrap();
        assert_eq!(uploaded, 3);

        let query = QueryEmbeddings::new().with_dense(vec![1.0, 0.0]);
        let hits = strategy
            .search("t", &query, &SearchOptions::TopK { limit: 2 })
            .unwrap();
        assert_eq!(ids(&hits), vec!["doc0", "doc1"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn sparse_strategy_searches_by_term_overlap() {
        let strategy = SearchStrategy::sparse_only(InMemoryStore::new(), SparseSpace::new("s"));
        strategy.create_collection("t").unwrap();
        let embeddings = RecordEmbeddings::new().with_sparse(vec![
            sparse(7, 1.0),
            sparse(7, 0.4),
            sparse(9, 1.0),
        ]);
        strategy.upload_records("t", &records(3), embeddings).unwrap();

        let query = QueryEmbeddings::new().with_sparse(sparse(7, 1.0));
        let hits = strategy
            .search("t", &query, &SearchOptions::TopK { limit: 10 })
            .unwrap();
        assert_eq!(ids(&hits), vec!["doc0", "doc1", "doc2"]);
        assert_eq!(hits[2].score, 0.0);
    }

    #[test]
    fn fusion_strategy_fuses_both_branches() {
        let strategy = SearchStrategy::hybrid_fusion(
            InMemoryStore::new(),
            dense_space(),
            SparseSpace::new("sparse"),
        );
        strategy.create_collection("t").unwrap();
        // doc0 wins dense, doc1 wins sparse, doc2 is second in both
        let embeddings = RecordEmbeddings::new()
            .with_dense(vec![vec![1.0, 0.0], vec![0.1, 0.0], vec![0.9, 0.0]])
            .with_sparse(vec![sparse(1, 0.1), sparse(1, 1.0), sparse(1, 0.9)]);
        strategy.upload_records("t", &records(3), embeddings).unwrap();

        let query = QueryEmbeddings::new()
            .with_dense(vec![1.0, 0.0])
            .with_sparse(sparse(1, 1.0));
        let options = StrategyKind::HybridFusion
            .options(2, Some(1), Some(FusionAlgorithm::Rrf))
            .unwrap();
        let hits = strategy.search("t", &query, &options).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "doc2");
    }

    #[test]
    fn rerank_strategy_never_scores_outside_the_prefetch_union() {
        let strategy = SearchStrategy::hybrid_rerank(
            InMemoryStore::new(),
            dense_space(),
            SparseSpace::new("sparse"),
            MultiVectorSpace::new("rerank", 2).with_metric(Distance::Dot),
        );
        strategy.create_collection("t").unwrap();
        // doc2 has the best rerank matrix but misses both prefetch top-2s
        let embeddings = RecordEmbeddings::new()
            .with_dense(vec![vec![1.0, 0.0], vec![0.9, 0.0], vec![0.1, 0.0]])
            .with_sparse(vec![sparse(1, 1.0), sparse(1, 0.9), sparse(1, 0.1)])
            .with_multi(vec![
                vec![vec![0.0, 1.0]],
                vec![vec![0.5, 0.5]],
                vec![vec![1.0, 0.0]],
            ]);
        strategy.upload_records("t", &records(3), embeddings).unwrap();

        let query = QueryEmbeddings::new()
            .with_dense(vec![1.0, 0.0])
            .with_sparse(sparse(1, 1.0))
            .with_multi(vec![vec![1.0, 0.0]]);
        let options = StrategyKind::HybridRerank.options(2, Some(1), None).unwrap();
        let hits = strategy.search("t", &query, &options).unwrap();
        assert_eq!(ids(&hits), vec!["doc1", "doc0"]);
    }

    #[test]
    fn rerank_upload_batches_land_every_point() {
        let strategy = SearchStrategy::hybrid_rerank(
            InMemoryStore::new(),
            dense_space(),
            SparseSpace::new("sparse"),
            MultiVectorSpace::new("rerank", 2),
        );
        strategy.create_collection("t").unwrap();
        let n = 45;
        let embeddings = RecordEmbeddings::new()
            .with_dense((0..n).map(|i| vec![i as f32, 1.0]).collect())
            .with_sparse((0..n).map(|i| sparse(i as u32, 1.0)).collect())
            .with_multi((0..n).map(|i| vec![vec![i as f32, 1.0]]).collect());
        let uploaded = strategy
            .upload_records("t", &records(n), embeddings)
            .unwrap();
        assert_eq!(uploaded, n);
        assert_eq!(strategy.store().collection_info("t").unwrap().points, n);
    }

    #[test]
    fn mismatched_options_are_rejected() {
        let strategy = SearchStrategy::dense_only(InMemoryStore::new(), dense_space());
        strategy.create_collection("t").unwrap();
        let embeddings = RecordEmbeddings::new().with_dense(vec![vec![1.0, 0.0]]);
        strategy.upload_records("t", &records(1), embeddings).unwrap();

        let query = QueryEmbeddings::new().with_dense(vec![1.0, 0.0]);
        let err = strategy
            .search(
                "t",
                &query,
                &SearchOptions::PrefetchFuse {
                    limit: 2,
                    prefetch_limit: 4,
                    algorithm: FusionAlgorithm::Rrf,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn missing_query_embedding_is_rejected() {
        let strategy = SearchStrategy::hybrid_fusion(
            InMemoryStore::new(),
            dense_space(),
            SparseSpace::new("sparse"),
        );
        strategy.create_collection("t").unwrap();

        let query = QueryEmbeddings::new().with_dense(vec![1.0, 0.0]);
        let options = StrategyKind::HybridFusion
            .options(2, Some(2), Some(FusionAlgorithm::Rrf))
            .unwrap();
        let err = strategy.search("t", &query, &options).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn upload_replaces_records_with_same_id() {
        let strategy = SearchStrategy::dense_only(InMemoryStore::new(), dense_space());
        strategy.create_collection("t").unwrap();
        let first = RecordEmbeddings::new().with_dense(vec![vec![1.0, 0.0]]);
        strategy
            .upload_records("t", &[Record::new("doc0", "old")], first)
            .unwrap();
        let second = RecordEmbeddings::new().with_dense(vec![vec![0.0, 1.0]]);
        strategy
            .upload_records("t", &[Record::new("doc0", "new")], second)
            .unwrap();

        assert_eq!(strategy.store().collection_info("t").unwrap().points, 1);
        let point = strategy.store().retrieve("t", "doc0").unwrap().unwrap();
        assert_eq!(point.payload.text, "new");
    }
}
