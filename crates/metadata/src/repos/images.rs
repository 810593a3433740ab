//! Image record repository.

use crate::error::MetadataResult;
use crate::models::{ImageRow, NewImage};
use async_trait::async_trait;
use imagegate_core::PublicHandle;

/// Repository for upload records.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Insert a record inside a bounded-timeout transaction.
    ///
    /// A duplicate handle or proxy path fails with `Constraint`; nothing is
    /// written in that case.
    async fn insert_image(&self, image: &NewImage) -> MetadataResult<ImageRow>;

    /// Get a record by its public handle.
    async fn get_image_by_handle(&self, handle: &PublicHandle)
    -> MetadataResult<Option<ImageRow>>;

    /// Get a record by surrogate id.
    async fn get_image(&self, id: i64) -> MetadataResult<Option<ImageRow>>;

    /// Flip the active flag and return the updated record.
    async fn toggle_active(&self, id: i64) -> MetadataResult<ImageRow>;

    /// Add one to the view counter. Unknown handles are ignored.
    async fn increment_view_count(&self, handle: &PublicHandle) -> MetadataResult<()>;
}
