//! Application state shared across handlers.

use crate::admission::AdmissionGate;
use crate::client::TrustedProxies;
use crate::pipeline::{PipelineSettings, UploadPipeline};
use crate::proxy::ProxyReader;
use crate::ratelimit::RateLimitState;
use crate::resolve::{CacheSettings, ResolutionCache};
use imagegate_core::config::AppConfig;
use imagegate_metadata::RecordStore;
use imagegate_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store backend.
    pub storage: Arc<dyn BlobStore>,
    /// Record store.
    pub metadata: Arc<dyn RecordStore>,
    /// Upload admission.
    pub gate: AdmissionGate,
    /// Handle → direct URL cache.
    pub cache: Arc<ResolutionCache>,
    pub pipeline: Arc<UploadPipeline>,
    pub proxy: Arc<ProxyReader>,
    /// Forwarded-header trust policy.
    pub proxies: Arc<TrustedProxies>,
    /// Rate limiting state.
    pub rate_limit: RateLimitState,
}

impl AppState {
    /// Wire the components together. The configuration is expected to have
    /// been validated already.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn RecordStore>,
    ) -> Self {
        let proxies = TrustedProxies::from_config(&config.server.trusted_proxies);
        let rate_limit = RateLimitState::new(&config.rate_limit, proxies.clone());

        let cache = Arc::new(ResolutionCache::new(
            metadata.clone(),
            storage.clone(),
            CacheSettings::from(&config.cache),
        ));
        let pipeline = Arc::new(UploadPipeline::new(
            storage.clone(),
            metadata.clone(),
            cache.clone(),
            PipelineSettings {
                max_size_bytes: config.upload.max_size_bytes(),
                temp_dir: config.upload.temp_dir.clone(),
            },
        ));
        let proxy = Arc::new(ProxyReader::new(
            cache.clone(),
            storage.clone(),
            metadata.clone(),
        ));

        Self {
            gate: AdmissionGate::new(config.upload.max_concurrent_uploads),
            config: Arc::new(config),
            storage,
            metadata,
            cache,
            pipeline,
            proxy,
            proxies: Arc::new(proxies),
            rate_limit,
        }
    }

    /// Get the cleanup interval for rate limiter, if enabled.
    /// A zero interval falls back to 60 seconds (tokio::time::interval panics on zero).
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if !self.rate_limit.is_enabled() {
            return None;
        }
        Some(nonzero_interval(
            self.config.rate_limit.cleanup_interval_secs,
            "rate_limit.cleanup_interval_secs",
        ))
    }

    /// Get the purge interval for the resolution cache, if enabled.
    pub fn cache_cleanup_interval(&self) -> Option<Duration> {
        if !self.cache.is_enabled() {
            return None;
        }
        Some(nonzero_interval(
            self.config.cache.cleanup_interval_secs,
            "cache.cleanup_interval_secs",
        ))
    }
}

fn nonzero_interval(secs: u64, setting: &str) -> Duration {
    if secs == 0 {
        tracing::warn!("{setting} is 0, using default of 60 seconds");
        Duration::from_secs(60)
    } else {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagegate_metadata::SqliteStore;
    use imagegate_storage::FilesystemBackend;
    use tempfile::tempdir;

    async fn build_state(mut config: AppConfig) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn BlobStore> =
            Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());

        config.metadata.path = temp.path().join("images.db");
        config.metadata.min_connections = 1;
        let metadata: Arc<dyn RecordStore> =
            Arc::new(SqliteStore::new(&config.metadata).await.unwrap());

        let state = AppState::new(config, storage, metadata);
        (temp, state)
    }

    #[tokio::test]
    async fn rate_limit_cleanup_interval_none_when_disabled() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        assert!(state.rate_limit_cleanup_interval().is_none());
    }

    #[tokio::test]
    async fn rate_limit_cleanup_interval_enabled_respects_config() {
        let mut config = AppConfig::for_testing();
        config.rate_limit.enabled = true;
        config.rate_limit.cleanup_interval_secs = 12;

        let (_temp, state) = build_state(config).await;
        assert_eq!(
            state.rate_limit_cleanup_interval(),
            Some(Duration::from_secs(12))
        );
    }

    #[tokio::test]
    async fn cache_cleanup_interval_follows_config() {
        let mut config = AppConfig::for_testing();
        config.cache.cleanup_interval_secs = 0;
        let (_temp, state) = build_state(config).await;
        assert_eq!(state.cache_cleanup_interval(), Some(Duration::from_secs(60)));

        let mut config = AppConfig::for_testing();
        config.cache.enabled = false;
        let (_temp, state) = build_state(config).await;
        assert!(state.cache_cleanup_interval().is_none());
    }

    #[tokio::test]
    async fn gate_capacity_from_config() {
        let mut config = AppConfig::for_testing();
        config.upload.max_concurrent_uploads = 3;
        let (_temp, state) = build_state(config).await;
        assert_eq!(state.gate.capacity(), 3);
        assert_eq!(state.gate.available(), 3);
    }
}
