//! Error types for clipbox-core

use clipbox_domain::RecipeError;
use thiserror::Error;

/// Typed failure of a metadata, staging or reference store operation, and
/// the error every command returns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Caller-supplied data is structurally wrong
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A uniqueness constraint (id, tag name, album title) was violated
    #[error("Duplicated: {0}")]
    Duplicated(String),

    /// The addressed record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected failure inside a transactional block
    #[error("Internal error: {0}")]
    Internal(String),

    /// Backend-specific failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<RecipeError> for StorageError {
    fn from(err: RecipeError) -> Self {
        StorageError::InvalidParameter(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(err.to_string()),
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Duplicated(err.to_string())
            }
            _ => StorageError::Storage(err.to_string()),
        }
    }
}

/// Failure of a blob store operation. Coordinators log these and move on.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image file name: {0:?}")]
    InvalidFileName(String),

    #[error("Blob store error: {0}")]
    Storage(String),
}

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
