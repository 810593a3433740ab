//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides the Telegram bot token.
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

/// Environment variable that overrides the Telegram chat id.
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally visible base URL used to build public links
    /// (e.g., "https://img.example.com"). When unset, the URL is derived
    /// from the request's Host header and forwarded scheme.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Seconds to wait for in-flight requests after a shutdown signal.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: None,
            metrics_enabled: default_metrics_enabled(),
            trusted_proxies: Vec::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the graceful shutdown budget as a Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Upload admission and size limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum number of uploads processed at once. Excess uploads are
    /// rejected with 503 rather than queued.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// Maximum accepted file size in MiB.
    #[serde(default = "default_max_file_size_mib")]
    pub max_file_size_mib: u64,
    /// Budget for the whole upload (body read, blob store push, record insert).
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Directory for staged uploads. Defaults to the system temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_max_file_size_mib() -> u64 {
    10
}

fn default_upload_timeout_secs() -> u64 {
    30
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_file_size_mib: default_max_file_size_mib(),
            upload_timeout_secs: default_upload_timeout_secs(),
            temp_dir: None,
        }
    }
}

impl UploadConfig {
    /// Maximum accepted file size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_file_size_mib.saturating_mul(1024 * 1024)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_uploads == 0 {
            return Err("upload.max_concurrent_uploads must be at least 1".to_string());
        }
        if self.max_file_size_mib == 0 {
            return Err("upload.max_file_size_mib must be at least 1".to_string());
        }
        if self.upload_timeout_secs == 0 {
            return Err("upload.upload_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Resolution cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache resolved direct URLs. Disabling only costs latency.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// How long a resolved direct URL is trusted. Kept below the backend's
    /// real expiry (Telegram file links last about 24 hours).
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
    /// Upper bound on cached handles. When full, expired entries are purged
    /// first, then the entry closest to expiry is evicted.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Interval between sweeps of expired entries.
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_url_ttl_secs() -> u64 {
    23 * 60 * 60
}

fn default_cache_max_entries() -> usize {
    100_000
}

fn default_cache_cleanup_interval_secs() -> u64 {
    600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            url_ttl_secs: default_url_ttl_secs(),
            max_entries: default_cache_max_entries(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.cleanup_interval_secs == 0 {
            // tokio::time::interval panics on a zero period
            return Err("cache.cleanup_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Blob store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Telegram Bot API: files are posted to a chat as documents.
    Telegram {
        /// Bot token. Falls back to TELEGRAM_BOT_TOKEN env var.
        /// WARNING: Prefer the env var over storing the token in config files.
        #[serde(default)]
        bot_token: String,
        /// Target chat id. Falls back to TELEGRAM_CHAT_ID env var.
        #[serde(default)]
        chat_id: i64,
        /// Bot API base URL (overridable for self-hosted Bot API servers).
        #[serde(default = "default_telegram_api_url")]
        api_url: String,
        /// Per-request timeout for Bot API calls.
        #[serde(default = "default_telegram_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    /// Local filesystem storage (development and tests).
    Filesystem {
        /// Root directory for blobs.
        path: PathBuf,
    },
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_request_timeout_secs() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Telegram {
                bot_token,
                chat_id,
                api_url,
                ..
            } => {
                if bot_token.is_empty() {
                    return Err(format!(
                        "telegram storage requires storage.bot_token or {ENV_TELEGRAM_BOT_TOKEN}"
                    ));
                }
                if *chat_id == 0 {
                    return Err(format!(
                        "telegram storage requires storage.chat_id or {ENV_TELEGRAM_CHAT_ID}"
                    ));
                }
                if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
                    return Err("storage.api_url must be an http(s) URL".to_string());
                }
                Ok(())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration (SQLite).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
    /// Budget for each database operation. Unlike the upload timeout this
    /// is enforced per query, so a stuck insert fails on its own.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Maximum connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connections kept open while idle.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Recycle connections after this many seconds.
    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/images.db")
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    10
}

fn default_conn_max_lifetime_secs() -> u64 {
    300
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
            query_timeout_secs: default_query_timeout_secs(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            conn_max_lifetime_secs: default_conn_max_lifetime_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }

    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("metadata.max_connections must be at least 1".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "metadata.min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err("metadata.query_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Admin access configuration.
///
/// The toggle endpoint is only mounted when a token hash is configured.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    #[serde(default)]
    pub token_hash: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: Some(
                "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5".to_string(),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(hash) = &self.token_hash
            && (hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err("admin.token_hash must be 64 hex characters (SHA256)".to_string());
        }
        Ok(())
    }
}

/// Rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default)]
    pub enabled: bool,
    /// Requests per minute per client IP.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Burst size (allows temporary burst above rate limit).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Maximum number of unique IPs to track before rejecting new entries (default: 100000).
    /// When limit is reached, new IPs are rejected with 429 until cleanup runs.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Interval in seconds between cleanup sweeps of stale entries (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Entries not accessed within this period are evicted during cleanup.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    120
}

fn default_burst_size() -> u32 {
    20
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration.
    /// Returns warnings for configs that are questionable but allowed,
    /// and errors for configs that would fail at runtime.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.requests_per_minute == 0 {
            return Err("rate_limit.requests_per_minute must be at least 1".to_string());
        }

        if self.entry_ttl_secs < 120 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} is very short. \
                 Entries may be evicted before rate limits reset. \
                 Recommended minimum: 120 seconds.",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            admin: AdminConfig::for_testing(),
            ..Self::default()
        }
    }

    /// Apply the bare `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` variables on
    /// top of a telegram storage section. A non-numeric chat id is an error.
    pub fn apply_env_overrides(&mut self) -> Result<(), String> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let StorageConfig::Telegram {
            bot_token, chat_id, ..
        } = &mut self.storage
        else {
            return Ok(());
        };

        if let Some(token) = lookup(ENV_TELEGRAM_BOT_TOKEN).filter(|t| !t.is_empty()) {
            *bot_token = token;
        }
        if let Some(raw) = lookup(ENV_TELEGRAM_CHAT_ID).filter(|c| !c.is_empty()) {
            *chat_id = raw
                .trim()
                .parse()
                .map_err(|_| format!("{ENV_TELEGRAM_CHAT_ID} is not a valid chat id: {raw}"))?;
        }
        Ok(())
    }

    /// Validate every section. Returns non-fatal warnings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.upload.validate()?;
        self.cache.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.admin.validate()?;
        let mut warnings = self.rate_limit.validate()?;

        if self.server.trusted_proxies.len() == 1 && self.server.trusted_proxies[0] == "*" {
            warnings.push(
                "server.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 Clients can spoof their recorded IP address."
                    .to_string(),
            );
        }

        if self.cache.enabled && self.cache.url_ttl_secs >= 24 * 60 * 60 {
            warnings.push(format!(
                "cache.url_ttl_secs={} is not shorter than the 24h backend link lifetime; \
                 expired links may be served from cache",
                self.cache.url_ttl_secs
            ));
        }

        Ok(warnings)
    }
}
