//! Handle resolution with an expiring direct-URL cache.
//!
//! Blob store direct links expire, so they are never persisted. The cache
//! maps a public handle to its most recent direct URL until `expires_at`;
//! anything absent or expired is re-resolved through the record store and
//! [`BlobStore::refresh`]. The record store stays authoritative for whether
//! a handle exists and is active.

use crate::metrics::CACHE_LOOKUPS;
use imagegate_core::PublicHandle;
use imagegate_core::config::CacheConfig;
use imagegate_metadata::{MetadataError, RecordStore};
use imagegate_storage::{BlobStore, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A cached direct link.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub direct_url: String,
    pub content_type: String,
    pub expires_at: Instant,
}

/// Where to fetch a handle's bytes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImage {
    pub direct_url: String,
    pub content_type: String,
    /// True when the URL came from the cache rather than a fresh refresh.
    pub cached: bool,
}

/// Classification of a handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedImage),
    NotFound,
    Inactive,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("record lookup failed: {0}")]
    Lookup(#[from] MetadataError),

    #[error("direct link refresh failed: {0}")]
    Refresh(#[from] StorageError),
}

/// Cache tuning, usually derived from [`CacheConfig`].
#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: config.url_ttl(),
            max_entries: config.max_entries,
        }
    }
}

/// Handle → direct URL resolver.
pub struct ResolutionCache {
    entries: RwLock<HashMap<PublicHandle, CacheEntry>>,
    /// Bumped on every invalidation. A re-resolution that raced with an
    /// invalidation does not store its result.
    epoch: AtomicU64,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    settings: CacheSettings,
}

impl ResolutionCache {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            records,
            blobs,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Classify `handle` and, if it is servable, produce a direct URL.
    pub async fn resolve(&self, handle: &PublicHandle) -> Result<Resolution, ResolveError> {
        if let Some(entry) = self.lookup(handle) {
            CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Ok(Resolution::Found(ResolvedImage {
                direct_url: entry.direct_url,
                content_type: entry.content_type,
                cached: true,
            }));
        }
        CACHE_LOOKUPS.with_label_values(&["miss"]).inc();

        let epoch = self.epoch.load(Ordering::Acquire);

        let Some(row) = self.records.get_image_by_handle(handle).await? else {
            self.invalidate(handle);
            return Ok(Resolution::NotFound);
        };

        if !row.is_active {
            self.invalidate(handle);
            return Ok(Resolution::Inactive);
        }

        let direct_url = self.blobs.refresh(&row.backing_reference).await?;

        if self.epoch.load(Ordering::Acquire) == epoch {
            self.store(*handle, direct_url.clone(), row.content_type.clone());
        }

        Ok(Resolution::Found(ResolvedImage {
            direct_url,
            content_type: row.content_type,
            cached: false,
        }))
    }

    /// Record a direct URL obtained elsewhere (e.g. right after upload).
    pub fn seed(&self, handle: PublicHandle, direct_url: String, content_type: String) {
        self.store(handle, direct_url, content_type);
    }

    /// Drop the entry for `handle`, if any.
    pub fn invalidate(&self, handle: &PublicHandle) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.settings.enabled {
            self.write().remove(handle);
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, handle: &PublicHandle) -> Option<CacheEntry> {
        if !self.settings.enabled {
            return None;
        }
        let entries = self.read();
        entries
            .get(handle)
            .filter(|entry| Instant::now() < entry.expires_at)
            .cloned()
    }

    fn store(&self, handle: PublicHandle, direct_url: String, content_type: String) {
        if !self.settings.enabled || self.settings.max_entries == 0 {
            return;
        }

        let now = Instant::now();
        let entry = CacheEntry {
            direct_url,
            content_type,
            expires_at: now + self.settings.ttl,
        };

        let mut entries = self.write();
        if entries.len() >= self.settings.max_entries && !entries.contains_key(&handle) {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.settings.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(handle, entry);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PublicHandle, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("resolution cache RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PublicHandle, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("resolution cache RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }
}

/// Spawn a background task that periodically drops expired entries.
pub fn spawn_cleanup_task(cache: Arc<ResolutionCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = cache.len(), "resolution cache purged");
            }
        }
    })
}
