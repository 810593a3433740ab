//! The upload pipeline: stage, validate, store, record.
//!
//! Bytes are streamed into a temporary file while the size cap is enforced
//! and the leading bytes are sniffed. Only content that sniffs as an
//! allowed image reaches the blob store; only a stored blob gets a record;
//! and the public handle is returned only once the record is committed.

use crate::admission::Ticket;
use crate::metrics::{BYTES_UPLOADED, ORPHANED_BLOBS, UPLOAD_DURATION, UPLOADS_ACCEPTED};
use crate::resolve::ResolutionCache;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use imagegate_core::{ImageType, PublicHandle, SNIFF_LEN, classify, sanitize_filename};
use imagegate_metadata::{MetadataError, NewImage, RecordStore};
use imagegate_storage::{BlobStore, StagedBlob, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Failure while reading the request body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds the transport limit")]
    TooLarge,

    #[error("malformed request body: {0}")]
    Malformed(String),
}

/// One upload as received from a client.
pub struct UploadRequest<S> {
    pub body: S,
    pub declared_filename: String,
    /// Logged only; the stored type comes from sniffing.
    pub declared_content_type: Option<String>,
    /// Already sanitized client address.
    pub client_ip: String,
    /// Already sanitized user agent.
    pub user_agent: String,
    pub trace_id: String,
}

/// A committed upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub id: i64,
    pub handle: PublicHandle,
    pub proxy_path: String,
    pub filename: String,
    pub image_type: ImageType,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("unsupported content type: {detected}")]
    UnsupportedType { detected: String },

    #[error("empty upload")]
    Empty,

    #[error("{0}")]
    Body(String),

    #[error("staging failed: {0}")]
    Staging(#[from] std::io::Error),

    #[error("blob store unavailable: {0}")]
    BackendUnavailable(#[source] StorageError),

    #[error("record insert failed: {0}")]
    PersistenceFailed(#[source] MetadataError),
}

/// Upload pipeline settings.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub max_size_bytes: u64,
    pub temp_dir: Option<PathBuf>,
}

pub struct UploadPipeline {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<ResolutionCache>,
    settings: PipelineSettings,
}

impl UploadPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        cache: Arc<ResolutionCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            blobs,
            records,
            cache,
            settings,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.settings.max_size_bytes
    }

    /// Run one upload to completion.
    ///
    /// The ticket is held for the whole call and released on every exit
    /// path, including cancellation.
    #[instrument(
        skip_all,
        fields(trace_id = %request.trace_id, client_ip = %request.client_ip)
    )]
    pub async fn upload<S>(
        &self,
        ticket: Ticket,
        request: UploadRequest<S>,
    ) -> Result<UploadOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send,
    {
        let _ticket = ticket;
        let started = Instant::now();

        let filename = sanitize_filename(&request.declared_filename);
        tracing::debug!(
            declared_filename = %request.declared_filename,
            declared_content_type = ?request.declared_content_type,
            filename = %filename,
            "upload admitted"
        );

        let staged = self.stage(request.body, &filename).await?;
        let image_type = staged.image_type;
        let size = staged.size;

        let blob = StagedBlob {
            path: staged.file.path().to_path_buf(),
            filename: filename.clone(),
            content_type: image_type.mime_type().to_string(),
            size,
        };

        let stored = self.blobs.put(&blob).await.map_err(|e| {
            crate::metrics::record_upstream_error(self.blobs.backend_name(), "put");
            UploadError::BackendUnavailable(e)
        })?;
        drop(staged);

        let handle = PublicHandle::new();
        let proxy_path = handle.proxy_path(image_type.extension());
        let new_image = NewImage {
            backing_reference: stored.backing_reference.clone(),
            public_handle: handle,
            proxy_path: proxy_path.clone(),
            ip_address: request.client_ip,
            user_agent: request.user_agent,
            uploaded_at: OffsetDateTime::now_utc(),
            filename: filename.clone(),
            content_type: image_type.mime_type().to_string(),
        };

        // Counts and logs the blob as orphaned unless the record commits,
        // including when this future is dropped by the upload timeout.
        let mut uncommitted = UncommittedBlob {
            trace_id: request.trace_id,
            backend: self.blobs.backend_name(),
            backing_reference: stored.backing_reference.clone(),
            committed: false,
        };

        let row = match self.records.insert_image(&new_image).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(
                    trace_id = %uncommitted.trace_id,
                    error = %e,
                    "record insert failed"
                );
                return Err(UploadError::PersistenceFailed(e));
            }
        };
        uncommitted.committed = true;

        self.cache.seed(
            handle,
            stored.direct_url,
            image_type.mime_type().to_string(),
        );

        UPLOADS_ACCEPTED.inc();
        BYTES_UPLOADED.inc_by(size);
        UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
        tracing::info!(
            id = row.id,
            handle = %handle,
            content_type = image_type.mime_type(),
            size,
            "upload stored"
        );

        Ok(UploadOutcome {
            id: row.id,
            handle,
            proxy_path,
            filename,
            image_type,
            size,
        })
    }

    /// Copy the body to a temp file, enforcing the size cap and sniffing the
    /// first [`SNIFF_LEN`] bytes as they go by.
    async fn stage<S>(&self, body: S, filename: &str) -> Result<Staged, UploadError>
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send,
    {
        let limit = self.settings.max_size_bytes;
        let temp = match &self.settings.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let mut out = tokio::fs::File::from_std(temp.reopen()?);

        let mut body = std::pin::pin!(body);
        let mut prefix: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        let mut image_type: Option<ImageType> = None;
        let mut size: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| match e {
                BodyError::TooLarge => UploadError::PayloadTooLarge { limit },
                BodyError::Malformed(msg) => UploadError::Body(msg),
            })?;

            size += chunk.len() as u64;
            if size > limit {
                return Err(UploadError::PayloadTooLarge { limit });
            }

            if image_type.is_none() {
                let take = (SNIFF_LEN - prefix.len()).min(chunk.len());
                prefix.extend_from_slice(&chunk[..take]);
                if prefix.len() == SNIFF_LEN {
                    image_type = Some(sniff_prefix(&prefix, filename)?);
                }
            }

            out.write_all(&chunk).await?;
        }

        if size == 0 {
            return Err(UploadError::Empty);
        }
        let image_type = match image_type {
            Some(t) => t,
            None => sniff_prefix(&prefix, filename)?,
        };

        out.flush().await?;
        drop(out);

        Ok(Staged {
            file: temp,
            image_type,
            size,
        })
    }
}

/// A stored blob whose record has not been committed yet.
struct UncommittedBlob {
    trace_id: String,
    backend: &'static str,
    backing_reference: String,
    committed: bool,
}

impl Drop for UncommittedBlob {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        ORPHANED_BLOBS.inc();
        tracing::error!(
            trace_id = %self.trace_id,
            backend = self.backend,
            backing_reference = %self.backing_reference,
            "stored blob has no record and is orphaned"
        );
    }
}

struct Staged {
    file: NamedTempFile,
    image_type: ImageType,
    size: u64,
}

fn sniff_prefix(prefix: &[u8], filename: &str) -> Result<ImageType, UploadError> {
    classify(prefix, filename).map_err(|e| match e {
        imagegate_core::Error::UnsupportedType { detected } => {
            UploadError::UnsupportedType { detected }
        }
        other => UploadError::UnsupportedType {
            detected: other.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionGate;
    use crate::resolve::CacheSettings;
    use futures::stream;
    use imagegate_core::config::MetadataConfig;
    use imagegate_metadata::SqliteStore;
    use imagegate_storage::FilesystemBackend;
    use std::time::Duration;

    struct Fixture {
        temp: tempfile::TempDir,
        pipeline: UploadPipeline,
        gate: AdmissionGate,
        records: Arc<dyn RecordStore>,
    }

    async fn fixture(max_size_bytes: u64) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let config = MetadataConfig {
            path: temp.path().join("images.db"),
            min_connections: 1,
            max_connections: 4,
            ..MetadataConfig::default()
        };
        let records: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(&config).await.unwrap());
        let blobs: Arc<dyn BlobStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("blobs")).await.unwrap());
        let cache = Arc::new(ResolutionCache::new(
            records.clone(),
            blobs.clone(),
            CacheSettings {
                enabled: true,
                ttl: Duration::from_secs(60),
                max_entries: 16,
            },
        ));
        let staging = temp.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let pipeline = UploadPipeline::new(
            blobs,
            records.clone(),
            cache,
            PipelineSettings {
                max_size_bytes,
                temp_dir: Some(staging),
            },
        );
        Fixture {
            temp,
            pipeline,
            gate: AdmissionGate::new(1),
            records,
        }
    }

    fn png(len: usize) -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        data.resize(len, 0x01);
        data
    }

    fn request(
        chunks: Vec<Result<Bytes, BodyError>>,
        filename: &str,
    ) -> UploadRequest<impl Stream<Item = Result<Bytes, BodyError>> + Send> {
        UploadRequest {
            body: stream::iter(chunks),
            declared_filename: filename.to_string(),
            declared_content_type: Some("image/png".to_string()),
            client_ip: "192.0.2.1".to_string(),
            user_agent: "test-agent".to_string(),
            trace_id: "trace-test".to_string(),
        }
    }

    fn staging_is_empty(fx: &Fixture) -> bool {
        std::fs::read_dir(fx.temp.path().join("staging"))
            .unwrap()
            .next()
            .is_none()
    }

    #[tokio::test]
    async fn test_upload_commits_record() {
        let fx = fixture(1024 * 1024).await;
        let data = png(2000);
        let chunks = data
            .chunks(300)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let outcome = fx
            .pipeline
            .upload(fx.gate.try_admit().unwrap(), request(chunks, "holiday.png"))
            .await
            .unwrap();

        assert_eq!(outcome.image_type, ImageType::Png);
        assert_eq!(outcome.size, 2000);
        assert_eq!(outcome.proxy_path, format!("/file/{}.png", outcome.handle));

        let row = fx
            .records
            .get_image_by_handle(&outcome.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.filename, "holiday.png");
        assert_eq!(row.content_type, "image/png");
        assert_eq!(row.ip_address, "192.0.2.1");
        assert!(row.is_active);

        assert!(staging_is_empty(&fx));
        assert_eq!(fx.gate.available(), 1);
    }

    #[tokio::test]
    async fn test_oversize_rejected_mid_stream() {
        let fx = fixture(1000).await;
        let chunks = vec![Ok(Bytes::from(png(800))), Ok(Bytes::from(vec![1u8; 800]))];

        let err = fx
            .pipeline
            .upload(fx.gate.try_admit().unwrap(), request(chunks, "big.png"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::PayloadTooLarge { limit: 1000 }));
        assert!(staging_is_empty(&fx));
        assert_eq!(fx.gate.available(), 1);
    }

    #[tokio::test]
    async fn test_text_rejected_before_rest_of_body() {
        let fx = fixture(1024 * 1024).await;
        let first = Bytes::from(vec![b'a'; SNIFF_LEN]);
        let chunks = vec![
            Ok(first),
            Err(BodyError::Malformed("must not be read".into())),
        ];

        let err = fx
            .pipeline
            .upload(fx.gate.try_admit().unwrap(), request(chunks, "fake.png"))
            .await
            .unwrap_err();

        match err {
            UploadError::UnsupportedType { detected } => assert_eq!(detected, "text/plain"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let fx = fixture(1024).await;
        let err = fx
            .pipeline
            .upload(fx.gate.try_admit().unwrap(), request(vec![], "x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Empty));
    }

    #[tokio::test]
    async fn test_transport_limit_maps_to_too_large() {
        let fx = fixture(1024).await;
        let chunks = vec![Ok(Bytes::from(png(100))), Err(BodyError::TooLarge)];
        let err = fx
            .pipeline
            .upload(fx.gate.try_admit().unwrap(), request(chunks, "x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge { .. }));
    }

    /// Record store whose inserts never complete.
    struct StalledInserts(Arc<dyn RecordStore>);

    #[async_trait::async_trait]
    impl imagegate_metadata::ImageRepo for StalledInserts {
        async fn insert_image(
            &self,
            _image: &NewImage,
        ) -> imagegate_metadata::MetadataResult<imagegate_metadata::ImageRow> {
            std::future::pending().await
        }

        async fn get_image_by_handle(
            &self,
            handle: &PublicHandle,
        ) -> imagegate_metadata::MetadataResult<Option<imagegate_metadata::ImageRow>> {
            self.0.get_image_by_handle(handle).await
        }

        async fn get_image(
            &self,
            id: i64,
        ) -> imagegate_metadata::MetadataResult<Option<imagegate_metadata::ImageRow>> {
            self.0.get_image(id).await
        }

        async fn toggle_active(
            &self,
            id: i64,
        ) -> imagegate_metadata::MetadataResult<imagegate_metadata::ImageRow> {
            self.0.toggle_active(id).await
        }

        async fn increment_view_count(
            &self,
            handle: &PublicHandle,
        ) -> imagegate_metadata::MetadataResult<()> {
            self.0.increment_view_count(handle).await
        }
    }

    #[async_trait::async_trait]
    impl RecordStore for StalledInserts {
        async fn migrate(&self) -> imagegate_metadata::MetadataResult<()> {
            self.0.migrate().await
        }

        async fn health_check(&self) -> imagegate_metadata::MetadataResult<()> {
            self.0.health_check().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_insert_counts_orphaned_blob() {
        let fx = fixture(1024 * 1024).await;
        let blob_dir = fx.temp.path().join("stalled-blobs");
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBackend::new(&blob_dir).await.unwrap());
        let records: Arc<dyn RecordStore> = Arc::new(StalledInserts(fx.records.clone()));
        let cache = Arc::new(ResolutionCache::new(
            records.clone(),
            blobs.clone(),
            CacheSettings {
                enabled: true,
                ttl: Duration::from_secs(60),
                max_entries: 16,
            },
        ));
        let pipeline = UploadPipeline::new(
            blobs,
            records,
            cache,
            PipelineSettings {
                max_size_bytes: 1024 * 1024,
                temp_dir: Some(fx.temp.path().join("staging")),
            },
        );

        let before = ORPHANED_BLOBS.get();
        let upload = pipeline.upload(
            fx.gate.try_admit().unwrap(),
            request(vec![Ok(Bytes::from(png(600)))], "slow.png"),
        );
        let result = tokio::time::timeout(Duration::from_millis(200), upload).await;

        assert!(result.is_err(), "insert should still be pending");
        assert!(ORPHANED_BLOBS.get() > before);
        assert_eq!(fx.gate.available(), 1);
        assert!(fx.records.get_image(1).await.unwrap().is_none());
    }
}
