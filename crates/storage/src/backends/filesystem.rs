//! Local filesystem blob store.
//!
//! Intended for development and tests. Blobs live under `<root>/blobs/`, the
//! backing reference is the relative key, and direct URLs use the `fs://`
//! scheme. Links never expire, so `refresh` only checks existence.

use super::file_stream;
use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobBody, BlobStore, StagedBlob, StoredBlob};
use async_trait::async_trait;
use imagegate_core::ImageType;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::instrument;
use uuid::Uuid;

/// URL scheme for direct links produced by this backend.
pub const FS_URL_SCHEME: &str = "fs://";

const BLOB_PREFIX: &str = "blobs";

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOB_PREFIX)).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the canonicalization on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve `key` below `root`, rejecting anything that escapes it either
    /// lexically or through a symlink.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!("not a relative key: {key}")));
        }

        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize()?;

        // Nearest existing ancestor (or the path itself) must stay inside root.
        let mut probe = Some(path.as_path());
        while let Some(candidate) = probe {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let canonical = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    probe = candidate.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    fn key_from_url(direct_url: &str) -> StorageResult<&str> {
        direct_url.strip_prefix(FS_URL_SCHEME).ok_or_else(|| {
            StorageError::InvalidReference(format!("not a filesystem URL: {direct_url}"))
        })
    }

    fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self, blob), fields(backend = "filesystem", size = blob.size))]
    async fn put(&self, blob: &StagedBlob) -> StorageResult<StoredBlob> {
        let extension = ImageType::from_mime(&blob.content_type)
            .map(ImageType::extension)
            .unwrap_or_default();
        let key = format!("{BLOB_PREFIX}/{}{extension}", Uuid::new_v4());
        let path = self.key_path(&key).await?;

        // Copy to a sibling temp name, fsync, then rename into place.
        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let result = async {
            fs::copy(&blob.path, &temp_path).await?;
            fs::File::open(&temp_path).await?.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(StoredBlob {
            direct_url: format!("{FS_URL_SCHEME}{key}"),
            backing_reference: key,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn refresh(&self, backing_reference: &str) -> StorageResult<String> {
        let path = self.key_path(backing_reference).await?;
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(backing_reference.to_string()));
        }
        Ok(format!("{FS_URL_SCHEME}{backing_reference}"))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn fetch(&self, direct_url: &str) -> StorageResult<BlobBody> {
        let key = Self::key_from_url(direct_url)?;
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(Self::not_found(key))?;
        let content_length = file.metadata().await.ok().map(|m| m.len());

        Ok(BlobBody {
            stream: file_stream(file),
            content_length,
        })
    }

    async fn health_check(&self) -> StorageResult<()> {
        fs::metadata(self.root.join(BLOB_PREFIX)).await?;
        Ok(())
    }
}
