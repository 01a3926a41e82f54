//! Storage error types.

use std::io;
use thiserror::Error;

/// Storage operation errors.
///
/// Every backend reports the same variants for the same conditions, so callers
/// can branch on the variant without knowing which engine is underneath.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A store with this name already exists
    #[error("Store already exists: {0}")]
    DuplicateStore(String),

    /// No store with this name exists
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    /// No value is stored under this key
    #[error("Value not found: {0}")]
    ValueNotFound(String),

    /// A value is already stored under this key
    #[error("Value already exists: {0}")]
    DuplicateValue(String),

    /// The backend cannot build indexes
    #[error("Indexing is not supported by the {0} backend")]
    IndexingNotSupported(&'static str),

    /// The backend cannot evaluate structured queries
    #[error("Querying is not supported by the {0} backend")]
    QueryingNotSupported(&'static str),

    /// The caller passed something the backend cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Document (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite engine error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error while preparing backend files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a "value not found" error.
    pub fn is_value_not_found(&self) -> bool {
        matches!(self, StorageError::ValueNotFound(_))
    }

    /// Check if this is a "store not found" error.
    pub fn is_store_not_found(&self) -> bool {
        matches!(self, StorageError::StoreNotFound(_))
    }

    /// Check if the backend reported a missing capability rather than a failure.
    pub fn is_not_supported(&self) -> bool {
        matches!(
            self,
            StorageError::IndexingNotSupported(_) | StorageError::QueryingNotSupported(_)
        )
    }
}
