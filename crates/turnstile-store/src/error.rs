use thiserror::Error;
use turnstile_core::{IdentityId, StoreError};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("identity already exists: {first_name} {last_name}")]
    DuplicateIdentity { first_name: String, last_name: String },
    #[error("identity {0} not found")]
    IdentityNotFound(IdentityId),
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
