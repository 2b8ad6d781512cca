use thiserror::Error;

/// Errors surfaced by [`crate::KvStore`] implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Key not found")]
    KeyNotFound,
    #[error("store is closed")]
    Closed,
    #[error("storage backend error: {0}")]
    Backend(String),
}
