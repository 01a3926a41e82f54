use edv_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document ID is not base58 encoded")]
    NotBase58Encoded,

    #[error("Document ID was successfully base58 decoded, but the decoded value is not 128 bits long")]
    Not128BitValue,

    #[error("Vault with reference ID {0} already exists")]
    DuplicateVault(String),

    #[error("Document {0} already exists in this vault")]
    DuplicateDocument(String),

    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried
    Validation,
    /// Duplicate vault or document
    Conflict,
    /// Missing vault or document
    NotFound,
    /// The storage backend lacks a required capability
    Unsupported,
    /// Anything the backend reported that the caller cannot act on
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::NotBase58Encoded | Error::Not128BitValue => {
                ErrorKind::Validation
            }
            Error::DuplicateVault(_) | Error::DuplicateDocument(_) => ErrorKind::Conflict,
            Error::VaultNotFound(_) | Error::DocumentNotFound(_) => ErrorKind::NotFound,
            Error::Storage(StorageError::InvalidInput(_)) => ErrorKind::Validation,
            Error::Storage(e) if e.is_not_supported() => ErrorKind::Unsupported,
            Error::Json(_) | Error::Storage(_) => ErrorKind::Internal,
        }
    }
}
