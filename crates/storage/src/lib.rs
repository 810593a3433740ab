//! Blob store abstraction and backends for imagegate.
//!
//! This crate provides:
//! - The `BlobStore` trait: put staged bytes, re-resolve expiring direct
//!   URLs, stream bytes back
//! - Backends: Telegram Bot API and local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, telegram::TelegramBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{BlobBody, BlobStore, ByteStream, StagedBlob, StoredBlob};

use imagegate_core::config::StorageConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Telegram {
            bot_token,
            chat_id,
            api_url,
            request_timeout_secs,
        } => {
            let backend = TelegramBackend::new(
                api_url,
                bot_token,
                *chat_id,
                Duration::from_secs(*request_timeout_secs),
            )?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("blobs"),
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn from_config_telegram_ok() {
        let config = StorageConfig::Telegram {
            bot_token: "123:abc".to_string(),
            chat_id: -100,
            api_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 5,
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "telegram");
    }

    #[tokio::test]
    async fn from_config_rejects_missing_token() {
        let config = StorageConfig::Telegram {
            bot_token: String::new(),
            chat_id: -100,
            api_url: "https://api.telegram.org".to_string(),
            request_timeout_secs: 5,
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
