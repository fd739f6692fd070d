//! Exact-scoring in-memory vector store.
//!
//! Every query scans the whole collection and scores it exactly, so
//! results are deterministic and independent of index construction. This
//! is the reference backend the benchmarks and tests run against;
//! `hnsw_ef` hints on prefetch branches are accepted and ignored.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::embedding::{cosine_similarity, dot, MultiVector};
use crate::error::{Error, Result};

use super::{
    CollectionSchema, Distance, FusionAlgorithm, Point, Prefetch, QueryRequest, QueryVector,
    ScoredPoint, SpaceRef, UploadOptions, VectorData, VectorStore,
};

/// Rank constant for reciprocal rank fusion.
const RRF_K: f32 = 60.0;

struct Collection {
    schema: CollectionSchema,
    points: BTreeMap<String, Point>,
    created_at: DateTime<Utc>,
}

/// Shape summary of one collection.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub schema: CollectionSchema,
    pub points: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch one stored point by id.
    pub fn retrieve(&self, name: &str, id: &str) -> Result<Option<Point>> {
        let collections = self.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        Ok(collection.points.get(id).cloned())
    }

    /// Shape summary for one collection.
    pub fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let collections = self.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            schema: collection.schema.clone(),
            points: collection.points.len(),
            created_at: collection.created_at,
        })
    }

    fn insert_batch(&self, name: &str, batch: Vec<Point>) -> Result<()> {
        let mut collections = self.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        for point in batch {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }
}

impl VectorStore for InMemoryStore {
    fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<bool> {
        schema.validate()?;
        let mut collections = self.write();
        if collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                schema: schema.clone(),
                points: BTreeMap::new(),
                created_at: Utc::now(),
            },
        );
        tracing::debug!("created collection '{}' with spaces {:?}", name, schema.space_names());
        Ok(true)
    }

    fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut collections = self.write();
        if collections.remove(name).is_none() {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        tracing::debug!("deleted collection '{}'", name);
        Ok(true)
    }

    fn upload_points(
        &self,
        name: &str,
        points: Vec<Point>,
        options: &UploadOptions,
    ) -> Result<()> {
        {
            let collections = self.read();
            let collection = collections
                .get(name)
                .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
            for point in &points {
                validate_point(name, &collection.schema, point)?;
            }
        }

        let batch_size = options.batch_size.unwrap_or(points.len()).max(1);
        let concurrency = options.concurrency.max(1);
        let mut batches: Vec<Vec<Point>> = Vec::new();
        let mut iter = points.into_iter();
        loop {
            let batch: Vec<Point> = iter.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }

        // Waves of at most `concurrency` batches keep the in-flight bound
        // without building a dedicated thread pool.
        while !batches.is_empty() {
            let take = batches.len().min(concurrency);
            let wave: Vec<Vec<Point>> = batches.drain(..take).collect();
            wave.into_par_iter()
                .try_for_each(|batch| self.insert_batch(name, batch))?;
        }
        Ok(())
    }

    fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>> {
        let collections = self.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        match request {
            QueryRequest::Single {
                space,
                vector,
                limit,
                ..
            } => search_space(name, collection, space, vector, *limit),
            QueryRequest::Fused {
                prefetch,
                algorithm,
                limit,
            } => {
                let branches = run_prefetch(name, collection, prefetch)?;
                let mut fused = match algorithm {
                    FusionAlgorithm::Rrf => fuse_rrf(&branches),
                    FusionAlgorithm::Dbsf => fuse_dbsf(&branches),
                };
                fused.truncate(*limit);
                Ok(fused)
            }
            QueryRequest::Reranked {
                prefetch,
                space,
                query,
                limit,
            } => {
                let branches = run_prefetch(name, collection, prefetch)?;
                rerank_union(name, collection, &branches, space, query, *limit)
            }
        }
    }
}

fn validate_point(collection_name: &str, schema: &CollectionSchema, point: &Point) -> Result<()> {
    for name in schema.space_names() {
        let data = point.vectors.get(name).ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "point '{}' is missing a vector for space '{}'",
                point.id, name
            ))
        })?;
        match (schema.lookup(name), data) {
            (Some(SpaceRef::Dense(space)), VectorData::Dense(vector)) => {
                if vector.len() != space.dim {
                    return Err(Error::VectorDimension {
                        space: name.to_string(),
                        expected: space.dim,
                        actual: vector.len(),
                    });
                }
            }
            (Some(SpaceRef::Sparse(_)), VectorData::Sparse(vector)) => {
                if vector.indices.len() != vector.values.len() {
                    return Err(Error::SchemaMismatch(format!(
                        "sparse vector for space '{}' has {} indices but {} values",
                        name,
                        vector.indices.len(),
                        vector.values.len()
                    )));
                }
            }
            (Some(SpaceRef::Multi(space)), VectorData::Multi(matrix)) => {
                if matrix.is_empty() {
                    return Err(Error::SchemaMismatch(format!(
                        "multi-vector for space '{name}' has no rows"
                    )));
                }
                for row in matrix {
                    if row.len() != space.dim {
                        return Err(Error::VectorDimension {
                            space: name.to_string(),
                            expected: space.dim,
                            actual: row.len(),
                        });
                    }
                }
            }
            _ => {
                return Err(Error::SchemaMismatch(format!(
                    "vector kind for space '{name}' does not match its registration"
                )))
            }
        }
    }
    for name in point.vectors.keys() {
        if schema.lookup(name).is_none() {
            return Err(Error::UnknownSpace {
                collection: collection_name.to_string(),
                space: name.clone(),
            });
        }
    }
    Ok(())
}

fn similarity(metric: Distance, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => dot(a, b),
    }
}

fn sort_hits(hits: &mut [ScoredPoint]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn search_space(
    collection_name: &str,
    collection: &Collection,
    space: &str,
    query: &QueryVector,
    limit: usize,
) -> Result<Vec<ScoredPoint>> {
    let space_ref = collection.schema.lookup(space).ok_or_else(|| Error::UnknownSpace {
        collection: collection_name.to_string(),
        space: space.to_string(),
    })?;
    match (&space_ref, query) {
        (SpaceRef::Dense(dense), QueryVector::Dense(vector)) => {
            if vector.len() != dense.dim {
                return Err(Error::VectorDimension {
                    space: space.to_string(),
                    expected: dense.dim,
                    actual: vector.len(),
                });
            }
        }
        (SpaceRef::Sparse(_), QueryVector::Sparse(_)) => {}
        (SpaceRef::Multi(_), _) => {
            return Err(Error::SchemaMismatch(format!(
                "space '{space}' is multi-vector and can only be queried through reranking"
            )))
        }
        _ => {
            return Err(Error::SchemaMismatch(format!(
                "query vector kind does not match space '{space}'"
            )))
        }
    }

    let metric = match space_ref {
        SpaceRef::Dense(dense) => dense.metric,
        _ => Distance::Dot,
    };
    let mut hits = Vec::with_capacity(collection.points.len());
    for point in collection.points.values() {
        let Some(data) = point.vectors.get(space) else {
            continue;
        };
        let score = match (data, query) {
            (VectorData::Dense(stored), QueryVector::Dense(vector)) => {
                similarity(metric, vector, stored)
            }
            (VectorData::Sparse(stored), QueryVector::Sparse(vector)) => vector.dot(stored),
            _ => continue,
        };
        hits.push(ScoredPoint {
            id: point.id.clone(),
            score,
            payload: point.payload.clone(),
        });
    }
    sort_hits(&mut hits);
    hits.truncate(limit);
    Ok(hits)
}

fn run_prefetch(
    collection_name: &str,
    collection: &Collection,
    prefetch: &[Prefetch],
) -> Result<Vec<Vec<ScoredPoint>>> {
    prefetch
        .iter()
        .map(|branch| {
            search_space(
                collection_name,
                collection,
                &branch.space,
                &branch.vector,
                branch.limit,
            )
        })
        .collect()
}

/// Reciprocal rank fusion: each branch contributes `1 / (k + rank)` per
/// document, with ranks starting at 1. Raw branch scores are discarded.
fn fuse_rrf(branches: &[Vec<ScoredPoint>]) -> Vec<ScoredPoint> {
    let mut fused: BTreeMap<&str, (f32, &ScoredPoint)> = BTreeMap::new();
    for branch in branches {
        for (rank, hit) in branch.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
            let entry = fused.entry(hit.id.as_str()).or_insert((0.0, hit));
            entry.0 += contribution;
        }
    }
    collect_fused(fused)
}

/// Distribution-based score fusion: each branch's scores are min-max
/// normalized against the `mean ± 3σ` band of that branch, then summed.
/// A branch with no score spread contributes a flat 0.5 per document.
fn fuse_dbsf(branches: &[Vec<ScoredPoint>]) -> Vec<ScoredPoint> {
    let mut fused: BTreeMap<&str, (f32, &ScoredPoint)> = BTreeMap::new();
    for branch in branches {
        if branch.is_empty() {
            continue;
        }
        let mean = branch.iter().map(|h| h.score).sum::<f32>() / branch.len() as f32;
        let variance =
            branch.iter().map(|h| (h.score - mean).powi(2)).sum::<f32>() / branch.len() as f32;
        let sigma = variance.sqrt();
        let lo = mean - 3.0 * sigma;
        let range = 6.0 * sigma;
        for hit in branch {
            let normalized = if range <= f32::EPSILON {
                0.5
            } else {
                ((hit.score - lo) / range).clamp(0.0, 1.0)
            };
            let entry = fused.entry(hit.id.as_str()).or_insert((0.0, hit));
            entry.0 += normalized;
        }
    }
    collect_fused(fused)
}

fn collect_fused(fused: BTreeMap<&str, (f32, &ScoredPoint)>) -> Vec<ScoredPoint> {
    let mut out: Vec<ScoredPoint> = fused
        .into_values()
        .map(|(score, hit)| ScoredPoint {
            id: hit.id.clone(),
            score,
            payload: hit.payload.clone(),
        })
        .collect();
    sort_hits(&mut out);
    out
}

/// MaxSim: for every query row take the best similarity against any stored
/// row, then sum over query rows.
fn max_sim(metric: Distance, query: &MultiVector, stored: &MultiVector) -> f32 {
    query
        .iter()
        .map(|query_row| {
            stored
                .iter()
                .map(|stored_row| similarity(metric, query_row, stored_row))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .map(|best| if best.is_finite() { best } else { 0.0 })
        .sum()
}

/// Union the prefetch candidates, rescore each against the query matrix,
/// and return the top `limit`. Candidates come only from the branches.
fn rerank_union(
    collection_name: &str,
    collection: &Collection,
    branches: &[Vec<ScoredPoint>],
    space: &str,
    query: &MultiVector,
    limit: usize,
) -> Result<Vec<ScoredPoint>> {
    let space_ref = collection.schema.lookup(space).ok_or_else(|| Error::UnknownSpace {
        collection: collection_name.to_string(),
        space: space.to_string(),
    })?;
    let SpaceRef::Multi(multi_space) = space_ref else {
        return Err(Error::SchemaMismatch(format!(
            "space '{space}' is not a multi-vector space"
        )));
    };
    for row in query {
        if row.len() != multi_space.dim {
            return Err(Error::VectorDimension {
                space: space.to_string(),
                expected: multi_space.dim,
                actual: row.len(),
            });
        }
    }

    let mut candidates: BTreeMap<&str, &ScoredPoint> = BTreeMap::new();
    for branch in branches {
        for hit in branch {
            candidates.entry(hit.id.as_str()).or_insert(hit);
        }
    }

    let mut out = Vec::with_capacity(candidates.len());
    for (id, hit) in candidates {
        let Some(point) = collection.points.get(id) else {
            continue;
        };
        let Some(VectorData::Multi(matrix)) = point.vectors.get(space) else {
            continue;
        };
        out.push(ScoredPoint {
            id: hit.id.clone(),
            score: max_sim(multi_space.metric, query, matrix),
            payload: hit.payload.clone(),
        });
    }
    sort_hits(&mut out);
    out.truncate(limit);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::SparseVector;
    use crate::store::{DenseSpace, MultiVectorSpace, Payload, SparseSpace};

    fn dense_schema(dim: usize) -> CollectionSchema {
        CollectionSchema {
            dense: Some(DenseSpace::new("dense", dim).with_metric(Distance::Dot)),
            sparse: None,
            rerank: None,
        }
    }

    fn full_schema(dim: usize) -> CollectionSchema {
        CollectionSchema {
            dense: Some(DenseSpace::new("dense", dim).with_metric(Distance::Dot)),
            sparse: Some(SparseSpace::new("sparse")),
            rerank: Some(MultiVectorSpace::new("rerank", dim).with_metric(Distance::Dot)),
        }
    }

    fn payload(id: &str) -> Payload {
        Payload {
            doc_id: id.to_string(),
            text: format!("text {id}"),
        }
    }

    fn dense_point(id: &str, vector: Vec<f32>) -> Point {
        let mut vectors = BTreeMap::new();
        vectors.insert("dense".to_string(), VectorData::Dense(vector));
        Point {
            id: id.to_string(),
            vectors,
            payload: payload(id),
        }
    }

    fn full_point(id: &str, dense: Vec<f32>, sparse: SparseVector, multi: MultiVector) -> Point {
        let mut vectors = BTreeMap::new();
        vectors.insert("dense".to_string(), VectorData::Dense(dense));
        vectors.insert("sparse".to_string(), VectorData::Sparse(sparse));
        vectors.insert("rerank".to_string(), VectorData::Multi(multi));
        Point {
            id: id.to_string(),
            vectors,
            payload: payload(id),
        }
    }

    fn dense_request(vector: Vec<f32>, limit: usize) -> QueryRequest {
        QueryRequest::Single {
            space: "dense".to_string(),
            vector: QueryVector::Dense(vector),
            limit,
            hnsw_ef: Some(128),
        }
    }

    fn ids(hits: &[ScoredPoint]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn create_twice_fails_and_delete_missing_fails() {
        let store = InMemoryStore::new();
        assert!(store.create_collection("c", &dense_schema(2)).unwrap());
        let err = store.create_collection("c", &dense_schema(2)).unwrap_err();
        assert!(matches!(err, Error::CollectionExists(_)));

        let err = store.delete_collection("missing").unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(_)));
    }

    #[test]
    fn delete_then_recreate_yields_empty_collection() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![dense_point("a", vec![1.0, 0.0])],
                &UploadOptions::default(),
            )
            .unwrap();
        assert!(store.delete_collection("c").unwrap());
        assert!(store.create_collection("c", &dense_schema(2)).unwrap());
        assert_eq!(store.collection_info("c").unwrap().points, 0);
    }

    #[test]
    fn upload_replaces_points_with_same_id() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![dense_point("a", vec![1.0, 0.0])],
                &UploadOptions::default(),
            )
            .unwrap();
        store
            .upload_points(
                "c",
                vec![dense_point("a", vec![0.0, 1.0])],
                &UploadOptions::default(),
            )
            .unwrap();

        assert_eq!(store.collection_info("c").unwrap().points, 1);
        let point = store.retrieve("c", "a").unwrap().unwrap();
        assert_eq!(
            point.vectors.get("dense"),
            Some(&VectorData::Dense(vec![0.0, 1.0]))
        );
    }

    #[test]
    fn upload_validates_against_schema() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();

        // wrong dimension
        let err = store
            .upload_points(
                "c",
                vec![dense_point("a", vec![1.0, 0.0, 0.0])],
                &UploadOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::VectorDimension { expected: 2, actual: 3, .. }));

        // missing declared space
        let bare = Point {
            id: "b".to_string(),
            vectors: BTreeMap::new(),
            payload: payload("b"),
        };
        let err = store
            .upload_points("c", vec![bare], &UploadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        // vector for an unregistered space
        let mut point = dense_point("d", vec![1.0, 0.0]);
        point.vectors.insert(
            "extra".to_string(),
            VectorData::Sparse(SparseVector::new(vec![0], vec![1.0])),
        );
        let err = store
            .upload_points("c", vec![point], &UploadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSpace { .. }));
    }

    #[test]
    fn batched_parallel_upload_lands_every_point() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        let points: Vec<Point> = (0..7)
            .map(|i| dense_point(&format!("p{i}"), vec![i as f32, 1.0]))
            .collect();
        store
            .upload_points(
                "c",
                points,
                &UploadOptions {
                    batch_size: Some(2),
                    concurrency: 3,
                },
            )
            .unwrap();
        assert_eq!(store.collection_info("c").unwrap().points, 7);
    }

    #[test]
    fn dense_query_sorts_descending_and_truncates() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![
                    dense_point("a", vec![1.0, 0.0]),
                    dense_point("b", vec![0.5, 0.0]),
                    dense_point("c", vec![0.8, 0.0]),
                ],
                &UploadOptions::default(),
            )
            .unwrap();

        let hits = store.query("c", &dense_request(vec![1.0, 0.0], 2)).unwrap();
        assert_eq!(ids(&hits), vec!["a", "c"]);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].payload.doc_id, "a");
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![
                    dense_point("z", vec![0.7, 0.0]),
                    dense_point("y", vec![0.7, 0.0]),
                ],
                &UploadOptions::default(),
            )
            .unwrap();
        let hits = store.query("c", &dense_request(vec![1.0, 0.0], 10)).unwrap();
        assert_eq!(ids(&hits), vec!["y", "z"]);
    }

    #[test]
    fn query_rejects_bad_shapes() {
        let store = InMemoryStore::new();
        store.create_collection("c", &full_schema(2)).unwrap();

        let err = store
            .query("c", &dense_request(vec![1.0, 0.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, Error::VectorDimension { .. }));

        let err = store
            .query(
                "c",
                &QueryRequest::Single {
                    space: "nope".to_string(),
                    vector: QueryVector::Dense(vec![1.0, 0.0]),
                    limit: 1,
                    hnsw_ef: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSpace { .. }));

        // dense vector against the sparse space
        let err = store
            .query(
                "c",
                &QueryRequest::Single {
                    space: "sparse".to_string(),
                    vector: QueryVector::Dense(vec![1.0, 0.0]),
                    limit: 1,
                    hnsw_ef: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        // multi-vector spaces cannot be queried directly
        let err = store
            .query(
                "c",
                &QueryRequest::Single {
                    space: "rerank".to_string(),
                    vector: QueryVector::Dense(vec![1.0, 0.0]),
                    limit: 1,
                    hnsw_ef: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));

        let err = store
            .query("missing", &dense_request(vec![1.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(_)));
    }

    #[test]
    fn sparse_query_scores_by_dot_product() {
        let store = InMemoryStore::new();
        store.create_collection("c", &full_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![
                    full_point(
                        "a",
                        vec![0.0, 0.0],
                        SparseVector::new(vec![1, 3], vec![2.0, 1.0]),
                        vec![vec![0.0, 0.0]],
                    ),
                    full_point(
                        "b",
                        vec![0.0, 0.0],
                        SparseVector::new(vec![2], vec![5.0]),
                        vec![vec![0.0, 0.0]],
                    ),
                ],
                &UploadOptions::default(),
            )
            .unwrap();

        let hits = store
            .query(
                "c",
                &QueryRequest::Single {
                    space: "sparse".to_string(),
                    vector: QueryVector::Sparse(SparseVector::new(vec![1], vec![3.0])),
                    limit: 10,
                    hnsw_ef: None,
                },
            )
            .unwrap();
        assert_eq!(ids(&hits), vec!["a", "b"]);
        assert!((hits[0].score - 6.0).abs() < 1e-6);
        assert_eq!(hits[1].score, 0.0);
    }

    fn fusion_fixture(store: &InMemoryStore) {
        store.create_collection("c", &full_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![
                    full_point(
                        "a",
                        vec![1.0, 0.0],
                        SparseVector::new(vec![1], vec![0.1]),
                        vec![vec![1.0, 0.0]],
                    ),
                    full_point(
                        "b",
                        vec![0.1, 0.0],
                        SparseVector::new(vec![1], vec![1.0]),
                        vec![vec![1.0, 0.0]],
                    ),
                    full_point(
                        "c",
                        vec![0.9, 0.0],
                        SparseVector::new(vec![1], vec![0.9]),
                        vec![vec![1.0, 0.0]],
                    ),
                ],
                &UploadOptions::default(),
            )
            .unwrap();
    }

    fn hybrid_prefetch(limit: usize) -> Vec<Prefetch> {
        vec![
            Prefetch {
                space: "dense".to_string(),
                vector: QueryVector::Dense(vec![1.0, 0.0]),
                limit,
                hnsw_ef: Some(128),
            },
            Prefetch {
                space: "sparse".to_string(),
                vector: QueryVector::Sparse(SparseVector::new(vec![1], vec![1.0])),
                limit,
                hnsw_ef: None,
            },
        ]
    }

    #[test]
    fn rrf_rewards_documents_ranked_in_both_branches() {
        let store = InMemoryStore::new();
        fusion_fixture(&store);

        // dense top-2 is {a, c}, sparse top-2 is {b, c}; only c appears in
        // both branches, so it fuses highest. a and b tie and fall back to
        // id order.
        let hits = store
            .query(
                "c",
                &QueryRequest::Fused {
                    prefetch: hybrid_prefetch(2),
                    algorithm: FusionAlgorithm::Rrf,
                    limit: 10,
                },
            )
            .unwrap();
        assert_eq!(ids(&hits), vec!["c", "a", "b"]);
        let expected = 1.0 / 62.0 + 1.0 / 62.0;
        assert!((hits[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn fused_results_respect_limit() {
        let store = InMemoryStore::new();
        fusion_fixture(&store);
        let hits = store
            .query(
                "c",
                &QueryRequest::Fused {
                    prefetch: hybrid_prefetch(3),
                    algorithm: FusionAlgorithm::Rrf,
                    limit: 2,
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn dbsf_flattens_branches_without_spread() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        store
            .upload_points(
                "c",
                vec![
                    dense_point("a", vec![0.4, 0.0]),
                    dense_point("b", vec![0.4, 0.0]),
                ],
                &UploadOptions::default(),
            )
            .unwrap();

        let hits = store
            .query(
                "c",
                &QueryRequest::Fused {
                    prefetch: vec![Prefetch {
                        space: "dense".to_string(),
                        vector: QueryVector::Dense(vec![1.0, 0.0]),
                        limit: 10,
                        hnsw_ef: None,
                    }],
                    algorithm: FusionAlgorithm::Dbsf,
                    limit: 10,
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            assert!((hit.score - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn dbsf_preserves_branch_order_and_normalizes() {
        let store = InMemoryStore::new();
        fusion_fixture(&store);
        let hits = store
            .query(
                "c",
                &QueryRequest::Fused {
                    prefetch: vec![Prefetch {
                        space: "dense".to_string(),
                        vector: QueryVector::Dense(vec![1.0, 0.0]),
                        limit: 10,
                        hnsw_ef: None,
                    }],
                    algorithm: FusionAlgorithm::Dbsf,
                    limit: 10,
                },
            )
            .unwrap();
        assert_eq!(ids(&hits), vec!["a", "c", "b"]);
        for hit in &hits {
            assert!(hit.score >= 0.0 && hit.score <= 1.0);
        }
    }

    #[test]
    fn max_sim_sums_best_match_per_query_row() {
        let query = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let stored = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        assert!((max_sim(Distance::Dot, &query, &stored) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn rerank_only_rescores_prefetched_candidates() {
        let store = InMemoryStore::new();
        store.create_collection("c", &full_schema(2)).unwrap();
        // c has the best rerank matrix but sits outside the dense top-2
        store
            .upload_points(
                "c",
                vec![
                    full_point(
                        "a",
                        vec![1.0, 0.0],
                        SparseVector::new(vec![], vec![]),
                        vec![vec![0.0, 1.0]],
                    ),
                    full_point(
                        "b",
                        vec![0.9, 0.0],
                        SparseVector::new(vec![], vec![]),
                        vec![vec![0.5, 0.5]],
                    ),
                    full_point(
                        "c",
                        vec![0.1, 0.0],
                        SparseVector::new(vec![], vec![]),
                        vec![vec![1.0, 0.0]],
                    ),
                ],
                &UploadOptions::default(),
            )
            .unwrap();

        let hits = store
            .query(
                "c",
                &QueryRequest::Reranked {
                    prefetch: vec![Prefetch {
                        space: "dense".to_string(),
                        vector: QueryVector::Dense(vec![1.0, 0.0]),
                        limit: 2,
                        hnsw_ef: Some(128),
                    }],
                    space: "rerank".to_string(),
                    query: vec![vec![1.0, 0.0]],
                    limit: 10,
                },
            )
            .unwrap();
        assert_eq!(ids(&hits), vec!["b", "a"]);
        assert!(!hits.iter().any(|h| h.id == "c"));
    }

    #[test]
    fn round_trip_preserves_payload() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        let mut point = dense_point("doc-7", vec![0.3, 0.4]);
        point.payload.text = "the original text".to_string();
        store
            .upload_points("c", vec![point.clone()], &UploadOptions::default())
            .unwrap();

        let stored = store.retrieve("c", "doc-7").unwrap().unwrap();
        assert_eq!(stored, point);

        let hits = store.query("c", &dense_request(vec![0.3, 0.4], 1)).unwrap();
        assert_eq!(hits[0].payload.text, "the original text");
    }

    #[test]
    fn empty_collection_returns_no_hits() {
        let store = InMemoryStore::new();
        store.create_collection("c", &dense_schema(2)).unwrap();
        let hits = store.query("c", &dense_request(vec![1.0, 0.0], 5)).unwrap();
        assert!(hits.is_empty());
    }
}
