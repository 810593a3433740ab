//! In-memory blob store with call counters.

use async_trait::async_trait;
use bytes::Bytes;
use imagegate_storage::{
    BlobBody, BlobStore, StagedBlob, StorageError, StorageResult, StoredBlob,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

const URL_PREFIX: &str = "mem://";

/// Blob store keeping bytes in memory.
///
/// `hold_puts` makes every put wait for a permit, which lets tests keep
/// uploads in flight. `fail_puts` makes every put fail.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    pub put_calls: AtomicUsize,
    pub puts_started: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub fail_puts: AtomicBool,
    hold: Option<Semaphore>,
}

#[allow(dead_code)]
impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose puts block until [`release_puts`](Self::release_puts).
    pub fn holding_puts() -> Self {
        Self {
            hold: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release_puts(&self, count: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(count);
        }
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn puts(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Drop a blob behind the store's back.
    pub fn forget(&self, backing_reference: &str) {
        self.blobs.lock().unwrap().remove(backing_reference);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, blob: &StagedBlob) -> StorageResult<StoredBlob> {
        self.puts_started.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.acquire()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .forget();
        }
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected put failure".to_string()));
        }

        let data = tokio::fs::read(&blob.path).await?;
        let key = uuid::Uuid::new_v4().to_string();
        self.blobs
            .lock()
            .unwrap()
            .insert(key.clone(), Bytes::from(data));

        Ok(StoredBlob {
            direct_url: format!("{URL_PREFIX}{key}"),
            backing_reference: key,
        })
    }

    async fn refresh(&self, backing_reference: &str) -> StorageResult<String> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.blobs.lock().unwrap().contains_key(backing_reference) {
            Ok(format!("{URL_PREFIX}{backing_reference}"))
        } else {
            Err(StorageError::NotFound(backing_reference.to_string()))
        }
    }

    async fn fetch(&self, direct_url: &str) -> StorageResult<BlobBody> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let key = direct_url
            .strip_prefix(URL_PREFIX)
            .ok_or_else(|| StorageError::InvalidReference(direct_url.to_string()))?;
        let data = self
            .blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(BlobBody {
            content_length: Some(data.len() as u64),
            stream: Box::pin(futures::stream::once(async move { Ok(data) })),
        })
    }
}
