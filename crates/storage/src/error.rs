//! Storage error types.

use thiserror::Error;

/// Blob store operation errors.
///
/// Messages never include direct URLs: Telegram file links embed the bot
/// token.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("backend rejected request: {0}")]
    Backend(String),

    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid backing reference: {0}")]
    InvalidReference(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Wrap a reqwest error with its URL stripped.
    pub(crate) fn http(err: reqwest::Error) -> Self {
        Self::Http(err.without_url().to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
