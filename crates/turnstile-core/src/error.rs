use thiserror::Error;

/// Persistence layer failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollError {
    #[error("no valid embeddings supplied for identity {0}")]
    EmptyEmbeddingSet(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by [`AccessEngine`](crate::engine::AccessEngine) operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("access log write failed: {0}")]
    Log(#[source] StoreError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
