//! Crate-wide error type.
//!
//! Library code returns [`enum@Error`] so callers can match on failure
//! classes; the CLI layer wraps everything in `anyhow` for reporting.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("collection '{collection}' has no vector space named '{space}'")]
    UnknownSpace { collection: String, space: String },

    #[error("vector for space '{space}' has dimension {actual}, expected {expected}")]
    VectorDimension {
        space: String,
        expected: usize,
        actual: usize,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("embedding stream for space '{space}' has {actual} entries for {expected} records")]
    Alignment {
        space: String,
        expected: usize,
        actual: usize,
    },

    #[error("strategy requires a {0} encoder but none was supplied")]
    MissingEmbedder(&'static str),

    #[error("invalid search options: {0}")]
    InvalidOptions(String),

    #[error("unknown strategy '{0}' (expected dense, sparse, hybrid-fusion, or hybrid-rerank)")]
    UnknownStrategy(String),

    #[error("unknown fusion algorithm '{0}' (expected rrf or dbsf)")]
    UnknownFusion(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("dataset error in {path}: {message}")]
    Dataset { path: String, message: String },
}
