//! Persistence Error Types

use std::io;
use thiserror::Error;

/// Model and report persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally invalid model file
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
