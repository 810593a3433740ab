//! Durable record store for imagegate.
//!
//! One SQLite table maps each public handle to the blob store's backing
//! reference, together with the upload metadata, the active flag and the
//! view counter. Every operation runs under the configured query timeout.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ImageRow, NewImage};
pub use repos::ImageRepo;
pub use store::{RecordStore, SqliteStore};

use imagegate_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a record store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn RecordStore>> {
    config.validate().map_err(MetadataError::Config)?;
    let store = SqliteStore::new(config).await?;
    Ok(Arc::new(store) as Arc<dyn RecordStore>)
}
