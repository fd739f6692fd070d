//! Point assembly.
//!
//! Bridges the dataset and the store: corpus records plus one embedding
//! stream per declared space become uploadable points, and scored points
//! come back out as `(document id, score)` pairs for evaluation. Every
//! declared space must be covered by a stream of exactly one embedding
//! per record; both checks fail loudly rather than uploading skewed data.

use std::collections::BTreeMap;

use crate::dataset::Record;
use crate::embedding::{DenseVector, MultiVector, SparseVector};
use crate::error::{Error, Result};
use crate::store::{CollectionSchema, Payload, Point, ScoredPoint, VectorData};

/// Corpus-side embedding streams, one slot per space kind.
#[derive(Debug, Clone, Default)]
pub struct RecordEmbeddings {
    pub dense: Option<Vec<DenseVector>>,
    pub sparse: Option<Vec<SparseVector>>,
    pub multi: Option<Vec<MultiVector>>,
}

impl RecordEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dense(mut self, vectors: Vec<DenseVector>) -> Self {
        self.dense = Some(vectors);
        self
    }

    pub fn with_sparse(mut self, vectors: Vec<SparseVector>) -> Self {
        self.sparse = Some(vectors);
        self
    }

    pub fn with_multi(mut self, matrices: Vec<MultiVector>) -> Self {
        self.multi = Some(matrices);
        self
    }
}

fn check_coverage(space: Option<&str>, supplied: bool, kind: &str) -> Result<()> {
    match (space, supplied) {
        (Some(name), false) => Err(Error::SchemaMismatch(format!(
            "{kind} space '{name}' is declared but no {kind} embeddings were supplied"
        ))),
        (None, true) => Err(Error::SchemaMismatch(format!(
            "{kind} embeddings were supplied but no {kind} space is declared"
        ))),
        _ => Ok(()),
    }
}

fn check_alignment(space: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::Alignment {
            space: space.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Assemble one point per record. The point id is the record id, so
/// re-uploading a record replaces its previous point instead of
/// duplicating it.
pub fn build_points(
    schema: &CollectionSchema,
    records: &[Record],
    embeddings: RecordEmbeddings,
) -> Result<Vec<Point>> {
    check_coverage(
        schema.dense.as_ref().map(|s| s.name.as_str()),
        embeddings.dense.is_some(),
        "dense",
    )?;
    check_coverage(
        schema.sparse.as_ref().map(|s| s.name.as_str()),
        embeddings.sparse.is_some(),
        "sparse",
    )?;
    check_coverage(
        schema.rerank.as_ref().map(|s| s.name.as_str()),
        embeddings.multi.is_some(),
        "multi-vector",
    )?;

    if let (Some(space), Some(stream)) = (&schema.dense, &embeddings.dense) {
        check_alignment(&space.name, records.len(), stream.len())?;
    }
    if let (Some(space), Some(stream)) = (&schema.sparse, &embeddings.sparse) {
        check_alignment(&space.name, records.len(), stream.len())?;
    }
    if let (Some(space), Some(stream)) = (&schema.rerank, &embeddings.multi) {
        check_alignment(&space.name, records.len(), stream.len())?;
    }

    let mut dense_stream = embeddings.dense.map(Vec::into_iter);
    let mut sparse_stream = embeddings.sparse.map(Vec::into_iter);
    let mut multi_stream = embeddings.multi.map(Vec::into_iter);

    let mut points = Vec::with_capacity(records.len());
    for record in records {
        let mut vectors = BTreeMap::new();
        if let (Some(space), Some(stream)) = (&schema.dense, dense_stream.as_mut()) {
            if let Some(vector) = stream.next() {
                vectors.insert(space.name.clone(), VectorData::Dense(vector));
            }
        }
        if let (Some(space), Some(stream)) = (&schema.sparse, sparse_stream.as_mut()) {
            if let Some(vector) = stream.next() {
                vectors.insert(space.name.clone(), VectorData::Sparse(vector));
            }
        }
        if let (Some(space), Some(stream)) = (&schema.rerank, multi_stream.as_mut()) {
            if let Some(matrix) = stream.next() {
                vectors.insert(space.name.clone(), VectorData::Multi(matrix));
            }
        }
        points.push(Point {
            id: record.id.clone(),
            vectors,
            payload: Payload {
                doc_id: record.id.clone(),
                text: record.text.clone(),
            },
        });
    }
    Ok(points)
}

/// Project a search hit down to the pair evaluation consumes.
pub fn extract_result(hit: &ScoredPoint) -> (String, f32) {
    (hit.payload.doc_id.clone(), hit.score)
}
