//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid public handle: {0}")]
    InvalidHandle(String),

    #[error("unsupported content type: {detected}")]
    UnsupportedType { detected: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
