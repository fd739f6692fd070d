//! Vector-store protocol.
//!
//! A collection is a named set of points, each carrying one vector per
//! registered vector space plus a small payload. The [`VectorStore`] trait
//! is the narrow contract the retrieval strategies are written against:
//! create and delete collections, bulk-upload points, and execute one
//! composed query. Query requests mirror the shapes modern vector engines
//! expose, from a single nearest-neighbor search up to multi-branch
//! prefetch with server-side fusion or late-interaction reranking.
//!
//! The bundled [`InMemoryStore`] is an exact-scoring implementation used
//! by the benchmarks and tests; remote engines plug in behind the same
//! trait.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::embedding::{DenseVector, MultiVector, SparseVector};
use crate::error::{Error, Result};

pub use memory::InMemoryStore;

/// Similarity metric for dense and multi-vector spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Cosine,
    Dot,
}

/// A dense single-vector space registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseSpace {
    pub name: String,
    pub dim: usize,
    pub metric: Distance,
}

impl DenseSpace {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            metric: Distance::Cosine,
        }
    }

    pub fn with_metric(mut self, metric: Distance) -> Self {
        self.metric = metric;
        self
    }
}

/// A sparse term-weight space registration. Sparse spaces always score by
/// dot product over shared term indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseSpace {
    pub name: String,
}

impl SparseSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A multi-vector space registration for late-interaction scoring: a query
/// token matrix is compared against a stored token matrix with MaxSim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiVectorSpace {
    pub name: String,
    pub dim: usize,
    pub metric: Distance,
}

impl MultiVectorSpace {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            metric: Distance::Cosine,
        }
    }

    pub fn with_metric(mut self, metric: Distance) -> Self {
        self.metric = metric;
        self
    }
}

/// The named vector spaces a collection registers at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dense: Option<DenseSpace>,
    pub sparse: Option<SparseSpace>,
    pub rerank: Option<MultiVectorSpace>,
}

/// A borrowed view of one registered space, used to dispatch scoring.
#[derive(Debug, Clone, Copy)]
pub enum SpaceRef<'a> {
    Dense(&'a DenseSpace),
    Sparse(&'a SparseSpace),
    Multi(&'a MultiVectorSpace),
}

impl CollectionSchema {
    /// Names of all registered spaces.
    pub fn space_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(space) = &self.dense {
            names.push(space.name.as_str());
        }
        if let Some(space) = &self.sparse {
            names.push(space.name.as_str());
        }
        if let Some(space) = &self.rerank {
            names.push(space.name.as_str());
        }
        names
    }

    /// Look up a registered space by name.
    pub fn lookup(&self, name: &str) -> Option<SpaceRef<'_>> {
        if let Some(space) = &self.dense {
            if space.name == name {
                return Some(SpaceRef::Dense(space));
            }
        }
        if let Some(space) = &self.sparse {
            if space.name == name {
                return Some(SpaceRef::Sparse(space));
            }
        }
        if let Some(space) = &self.rerank {
            if space.name == name {
                return Some(SpaceRef::Multi(space));
            }
        }
        None
    }

    /// A schema must register at least one space and space names must be
    /// unique and non-empty.
    pub fn validate(&self) -> Result<()> {
        let names = self.space_names();
        if names.is_empty() {
            return Err(Error::SchemaMismatch(
                "collection schema registers no vector spaces".to_string(),
            ));
        }
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::SchemaMismatch(
                    "vector space names must be non-empty".to_string(),
                ));
            }
            if names[..i].contains(name) {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate vector space name '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// The vector a point stores for one space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorData {
    Dense(DenseVector),
    Sparse(SparseVector),
    Multi(MultiVector),
}

/// Payload stored with every point; carries enough to map a search hit
/// back to the source document without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub doc_id: String,
    pub text: String,
}

/// One uploadable record: an identifier, one vector per registered space,
/// and the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vectors: BTreeMap<String, VectorData>,
    pub payload: Payload,
}

/// A search hit. Scores are similarities: higher is better, whatever the
/// query shape that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// The query-side vector for a single-space search or prefetch branch.
#[derive(Debug, Clone)]
pub enum QueryVector {
    Dense(DenseVector),
    Sparse(SparseVector),
}

/// One recall branch of a multi-stage query.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub space: String,
    pub vector: QueryVector,
    pub limit: usize,
    /// HNSW search-breadth override, honored by approximate backends and
    /// ignored by exact ones.
    pub hnsw_ef: Option<usize>,
}

/// How multi-branch prefetch rankings are merged into one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionAlgorithm {
    /// Reciprocal rank fusion: positions matter, raw scores do not.
    Rrf,
    /// Distribution-based score fusion: scores are normalized per branch
    /// against a three-sigma band before summing.
    Dbsf,
}

impl FromStr for FusionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rrf" => Ok(FusionAlgorithm::Rrf),
            "dbsf" => Ok(FusionAlgorithm::Dbsf),
            other => Err(Error::UnknownFusion(other.to_string())),
        }
    }
}

impl fmt::Display for FusionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionAlgorithm::Rrf => write!(f, "rrf"),
            FusionAlgorithm::Dbsf => write!(f, "dbsf"),
        }
    }
}

/// A fully composed query, one variant per supported shape.
#[derive(Debug, Clone)]
pub enum QueryRequest {
    /// Nearest neighbors in one space.
    Single {
        space: String,
        vector: QueryVector,
        limit: usize,
        hnsw_ef: Option<usize>,
    },
    /// Run every prefetch branch, then fuse the branch rankings.
    Fused {
        prefetch: Vec<Prefetch>,
        algorithm: FusionAlgorithm,
        limit: usize,
    },
    /// Run every prefetch branch, union the candidates, then rescore the
    /// union against `query` in a multi-vector space. Documents outside
    /// the union can never appear in the result.
    Reranked {
        prefetch: Vec<Prefetch>,
        space: String,
        query: MultiVector,
        limit: usize,
    },
}

impl QueryRequest {
    pub fn limit(&self) -> usize {
        match self {
            QueryRequest::Single { limit, .. } => *limit,
            QueryRequest::Fused { limit, .. } => *limit,
            QueryRequest::Reranked { limit, .. } => *limit,
        }
    }
}

/// Bulk-upload behavior.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Points per batch; `None` uploads everything as one batch.
    pub batch_size: Option<usize>,
    /// Maximum batches in flight at once.
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            concurrency: 1,
        }
    }
}

/// The contract every vector-database backend implements.
///
/// `create_collection` and `delete_collection` return whether the backend
/// acknowledged the operation, mirroring the booleans wire protocols
/// report; creating an existing collection or deleting a missing one is
/// an error, which keeps benchmark runs honest about leftover state.
pub trait VectorStore: Send + Sync {
    fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<bool>;

    fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Upload points, replacing any existing point with the same id.
    fn upload_points(&self, name: &str, points: Vec<Point>, options: &UploadOptions)
        -> Result<()>;

    /// Execute one composed query. Results are sorted by descending score
    /// with ties broken by ascending point id, and never exceed the
    /// request's limit.
    fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>>;
}
