use std::path::{Path, PathBuf};

use crate::types::PoolError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// No pool file at the given path.
    #[error("pool not found: {0}")]
    MissingPool(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Error raised by the pool itself.
    #[error(transparent)]
    Core(#[from] PoolError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_pool(path: impl AsRef<Path>) -> Self {
        AdminError::MissingPool(path.as_ref().to_path_buf())
    }
}
