use thiserror::Error;

/// Terminal failures of a mining run.
///
/// Transitions committed by earlier iterations stay in the store whichever
/// variant ends the run.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("candidate pool has {available} entries, at least {required} are needed")]
    InsufficientPoolSize { available: usize, required: usize },

    #[error("clustering failed: {0}")]
    Clustering(#[from] ClusteringError),

    #[error("failed to read candidate pool: {0}")]
    StoreRead(#[source] anyhow::Error),

    #[error("bulk status transition failed: {0}")]
    StoreWrite(#[source] anyhow::Error),

    #[error("clustering task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ClusteringError {
    #[error("embedding {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("embedding {index} contains a non-finite value")]
    NonFinite { index: usize },

    #[error("embeddings must have at least one dimension")]
    EmptyEmbedding,

    #[error("{ids} identifiers given for {embeddings} embeddings")]
    LengthMismatch { ids: usize, embeddings: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
