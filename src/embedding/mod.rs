//! Embedding types and text encoders.
//!
//! Three encoder capabilities map onto the three kinds of vector space a
//! collection can register: dense single vectors, sparse term-weight
//! vectors, and late-interaction token matrices. The bundled hashing
//! encoders are deterministic and need no model files or network access,
//! which keeps benchmarks reproducible offline; production encoders
//! implement the same traits.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A fixed-length dense embedding.
pub type DenseVector = Vec<f32>;

/// A token matrix for late-interaction scoring, one row per token.
pub type MultiVector = Vec<Vec<f32>>;

/// A sparse term-weight vector as parallel index/value arrays.
///
/// Indices are term identifiers in an implicit vocabulary space and must be
/// sorted ascending with no duplicates; every encoder in this crate
/// produces them that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Self {
        Self { indices, values }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over the shared indices of two sorted sparse vectors.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Dot product of two dense vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two dense vectors; zero if either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Batch encoder for dense single-vector spaces.
pub trait DenseEncoder: Send + Sync {
    /// Encode a batch of texts, one vector per input in order.
    fn encode(&self, texts: &[&str]) -> Result<Vec<DenseVector>>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;

    fn encode_one(&self, text: &str) -> Result<DenseVector> {
        let mut batch = self.encode(&[text])?;
        Ok(batch.pop().unwrap_or_default())
    }
}

/// Batch encoder for sparse term-weight spaces.
pub trait SparseEncoder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> Result<Vec<SparseVector>>;

    fn name(&self) -> &str;
}

/// Batch encoder for late-interaction (multi-vector) spaces.
pub trait LateInteractionEncoder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> Result<Vec<MultiVector>>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// The encoders available to an experiment, one slot per space kind.
///
/// Slots are optional because each strategy only needs the encoders for
/// the spaces it registers; the experiment rejects a strategy whose
/// declared spaces are not all covered.
#[derive(Clone, Default)]
pub struct EncoderSet {
    pub dense: Option<Arc<dyn DenseEncoder>>,
    pub sparse: Option<Arc<dyn SparseEncoder>>,
    pub late: Option<Arc<dyn LateInteractionEncoder>>,
}

impl EncoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dense(mut self, encoder: Arc<dyn DenseEncoder>) -> Self {
        self.dense = Some(encoder);
        self
    }

    pub fn with_sparse(mut self, encoder: Arc<dyn SparseEncoder>) -> Self {
        self.sparse = Some(encoder);
        self
    }

    pub fn with_late(mut self, encoder: Arc<dyn LateInteractionEncoder>) -> Self {
        self.late = Some(encoder);
        self
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

fn hash_token(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

/// Feature-hashing dense encoder: tokens are hashed into a fixed number of
/// buckets, counted, and the bucket histogram is L2-normalized. Texts that
/// share vocabulary land in the same buckets and score high under cosine.
pub struct HashingDenseEncoder {
    dimension: usize,
}

impl HashingDenseEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode_text(&self, text: &str) -> DenseVector {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (hash_token(&token) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl DenseEncoder for HashingDenseEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<DenseVector>> {
        Ok(texts.iter().map(|text| self.encode_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing-dense"
    }
}

/// Hashing sparse encoder: each token's 32-bit hash is its term index and
/// its weight is the term frequency within the text.
pub struct HashingSparseEncoder;

impl HashingSparseEncoder {
    pub fn new() -> Self {
        Self
    }

    fn encode_text(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let total = tokens.len() as f32;
        let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *counts.entry(hash_token(token) as u32).or_insert(0.0) += 1.0;
        }
        let indices: Vec<u32> = counts.keys().copied().collect();
        let values: Vec<f32> = counts.values().map(|count| count / total.max(1.0)).collect();
        SparseVector::new(indices, values)
    }
}

impl Default for HashingSparseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseEncoder for HashingSparseEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|text| self.encode_text(text)).collect())
    }

    fn name(&self) -> &str {
        "hashing-sparse"
    }
}

/// Deterministic late-interaction encoder: every token maps to a unit
/// vector drawn from a generator seeded by the token's hash, so repeated
/// runs produce identical matrices and equal tokens produce equal rows.
pub struct HashingLateInteractionEncoder {
    dimension: usize,
    max_tokens: usize,
}

impl HashingLateInteractionEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_tokens: 32,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut state = hash_token(token);
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let value = ((state >> 40) & 0xFFFF) as f32 / 65536.0 - 0.5;
            vector.push(value);
        }
        l2_normalize(&mut vector);
        vector
    }

    fn encode_text(&self, text: &str) -> MultiVector {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            // A matrix must have at least one row; a zero row scores zero
            // against everything.
            return vec![vec![0.0; self.dimension]];
        }
        tokens
            .iter()
            .take(self.max_tokens)
            .map(|token| self.token_vector(token))
            .collect()
    }
}

impl LateInteractionEncoder for HashingLateInteractionEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<MultiVector>> {
        Ok(texts.iter().map(|text| self.encode_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing-late"
    }
}
