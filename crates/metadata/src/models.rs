//! Database models mapping to the record schema.

use imagegate_core::PublicHandle;
use sqlx::FromRow;
use time::OffsetDateTime;

/// One uploaded image.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: i64,
    /// Opaque reference the blob store re-resolves (Telegram file id).
    pub backing_reference: String,
    pub public_handle: String,
    /// Public path fragment, e.g. `/file/<handle>.png`.
    pub proxy_path: String,
    pub ip_address: String,
    pub user_agent: String,
    pub uploaded_at: OffsetDateTime,
    pub filename: String,
    pub content_type: String,
    pub is_active: bool,
    pub view_count: i64,
}

impl ImageRow {
    /// Parsed public handle. Rows are only ever written with valid handles.
    pub fn handle(&self) -> Option<PublicHandle> {
        PublicHandle::parse(&self.public_handle).ok()
    }
}

/// Values for a record about to be inserted.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub backing_reference: String,
    pub public_handle: PublicHandle,
    pub proxy_path: String,
    pub ip_address: String,
    pub user_agent: String,
    pub uploaded_at: OffsetDateTime,
    pub filename: String,
    pub content_type: String,
}
