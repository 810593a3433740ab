//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// An upload staged on local disk, ready to hand to a blob store.
#[derive(Clone, Debug)]
pub struct StagedBlob {
    /// Location of the staged bytes.
    pub path: PathBuf,
    /// Sanitized client filename.
    pub filename: String,
    /// Sniffed MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
}

/// Result of a successful put.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    /// Opaque identifier the backend re-resolves later. May itself be a URL.
    pub backing_reference: String,
    /// Time-limited URL the bytes can be fetched from right now.
    pub direct_url: String,
}

/// A blob body being streamed back from the backend.
pub struct BlobBody {
    pub stream: ByteStream,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for BlobBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// External durable blob store.
///
/// Direct URLs returned by [`put`](BlobStore::put) and
/// [`refresh`](BlobStore::refresh) expire; the backing reference does not.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Push staged bytes to the backend.
    async fn put(&self, blob: &StagedBlob) -> StorageResult<StoredBlob>;

    /// Produce a fresh direct URL for a backing reference.
    async fn refresh(&self, backing_reference: &str) -> StorageResult<String>;

    /// Open a streaming read of a direct URL.
    async fn fetch(&self, direct_url: &str) -> StorageResult<BlobBody>;

    /// Check backend connectivity and credentials.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
