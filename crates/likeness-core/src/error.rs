use thiserror::Error;

use crate::kv::BackendError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("detection has no descriptor — the detector could not embed this face")]
    MissingDescriptor,
    /// Only ever reported through a load report; loading recovers to an empty set.
    #[error("persisted faces under '{namespace}' are unreadable: {message}")]
    PersistenceCorrupt { namespace: String, message: String },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
}

pub type StoreResult<T> = Result<T, StoreError>;
