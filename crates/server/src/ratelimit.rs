//! Per-IP rate limiting middleware using a token bucket.
//!
//! # Memory Safety
//!
//! This implementation includes protection against memory exhaustion attacks:
//! - Configurable maximum entries (default: 100,000)
//! - Automatic eviction of stale entries based on TTL
//! - Background cleanup task that runs periodically
//!
//! Client addresses come from [`TrustedProxies`], so forwarded headers only
//! count when the peer is a configured proxy.

use crate::client::TrustedProxies;
use crate::error::ApiError;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use imagegate_core::config::RateLimitConfig;
use std::{
    net::SocketAddr,
    num::NonZeroU32,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

/// Minimum eviction threshold as a fraction of current entries before triggering rebuild.
/// Rebuilding resets rate-limit state, so small cleanups skip it.
const REBUILD_EVICTION_THRESHOLD_FRACTION: f64 = 0.10;

/// Minimum number of evictions to trigger a rebuild regardless of fraction.
const REBUILD_EVICTION_MIN_COUNT: usize = 100;

/// Rebuild at least this often to eventually reclaim memory.
const REBUILD_MIN_INTERVAL: Duration = Duration::from_secs(300);

struct RateLimitStateInner {
    /// Wrapped in RwLock so it can be rebuilt for memory cleanup.
    limiter: RwLock<KeyedLimiter>,
    /// Last access timestamps (for eviction).
    last_access: DashMap<String, Instant>,
    proxies: TrustedProxies,
    max_entries: u32,
    entry_ttl: Duration,
    connect_info_warned: AtomicBool,
    /// Prevents log spam while at capacity.
    at_capacity_warned: AtomicBool,
    quota: Quota,
    last_rebuild: RwLock<Instant>,
}

impl RateLimitState {
    /// Create a new rate limit state from configuration.
    pub fn new(config: &RateLimitConfig, proxies: TrustedProxies) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            inner: Some(Arc::new(RateLimitStateInner {
                limiter: RwLock::new(RateLimiter::dashmap(quota)),
                last_access: DashMap::new(),
                proxies,
                max_entries: config.max_entries,
                entry_ttl: Duration::from_secs(config.entry_ttl_secs),
                connect_info_warned: AtomicBool::new(false),
                at_capacity_warned: AtomicBool::new(false),
                quota,
                last_rebuild: RwLock::new(Instant::now()),
            })),
        }
    }

    /// Check if a request from the given IP is allowed.
    pub fn check_ip(&self, ip: &str) -> Result<(), RateLimitError> {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return Ok(()),
        };

        let now = Instant::now();
        let key = ip.to_string();

        // DashMap's len() can deadlock while holding an entry lock, so read it first.
        let current_len = inner.last_access.len();
        let at_capacity = current_len >= inner.max_entries as usize;

        match inner.last_access.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    if !inner.at_capacity_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            current_entries = current_len,
                            max_entries = inner.max_entries,
                            "Rate limiter at capacity, rejecting new clients"
                        );
                    }
                    return Err(RateLimitError {
                        retry_after_secs: 60,
                        reason: RateLimitReason::AtCapacity,
                    });
                }
                entry.insert(now);
            }
        }

        let limiter = inner.limiter.read().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        });
        match limiter.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time =
                    not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(RateLimitError {
                    retry_after_secs: wait_time.as_secs() + 1,
                    reason: RateLimitReason::RateLimited,
                })
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Evict entries idle for longer than the TTL. Returns the number evicted.
    ///
    /// Governor's internal map cannot drop keys, so after a large enough
    /// eviction the limiter itself is rebuilt.
    pub fn cleanup(&self) -> usize {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return 0,
        };

        let now = Instant::now();
        let ttl = inner.entry_ttl;

        let stale: Vec<String> = inner
            .last_access
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            // Only remove if still stale; a concurrent request may have touched it.
            if inner
                .last_access
                .remove_if(&key, |_, last_access| now.duration_since(*last_access) > ttl)
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            let before = inner.last_access.len() + evicted;
            if Self::should_rebuild(evicted, before, &inner.last_rebuild, now) {
                Self::rebuild(inner);
                tracing::debug!(
                    evicted,
                    remaining = inner.last_access.len(),
                    "Rebuilt rate limiter after cleanup"
                );
            }
            inner.at_capacity_warned.store(false, Ordering::Relaxed);
        }

        evicted
    }

    fn should_rebuild(
        evicted: usize,
        entries_before_eviction: usize,
        last_rebuild: &RwLock<Instant>,
        now: Instant,
    ) -> bool {
        let threshold = ((entries_before_eviction as f64 * REBUILD_EVICTION_THRESHOLD_FRACTION)
            as usize)
            .max(REBUILD_EVICTION_MIN_COUNT);
        if evicted >= threshold {
            return true;
        }

        let last = last_rebuild.read().unwrap_or_else(|poisoned| {
            tracing::warn!("last_rebuild RwLock was poisoned, recovering");
            poisoned.into_inner()
        });
        now.duration_since(*last) >= REBUILD_MIN_INTERVAL
    }

    fn rebuild(inner: &RateLimitStateInner) {
        let mut limiter = inner.limiter.write().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter RwLock was poisoned during rebuild, recovering");
            poisoned.into_inner()
        });
        *limiter = RateLimiter::dashmap(inner.quota);

        let mut last = inner.last_rebuild.write().unwrap_or_else(|poisoned| {
            tracing::warn!("last_rebuild RwLock was poisoned, recovering");
            poisoned.into_inner()
        });
        *last = Instant::now();
    }

    /// Number of tracked client addresses.
    pub fn entry_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.last_access.len())
    }

    fn client_ip(&self, req: &Request<Body>) -> String {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        if let Some(inner) = &self.inner {
            if peer.is_none() && !inner.connect_info_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "ConnectInfo not available for rate limiting. All requests share one \
                     bucket. Serve with into_make_service_with_connect_info::<SocketAddr>()."
                );
            }
            return inner.proxies.client_ip(req.headers(), peer);
        }
        TrustedProxies::None.client_ip(req.headers(), peer)
    }
}

/// Reason for rate limit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Request exceeded rate limit.
    RateLimited,
    /// Rate limiter at capacity, cannot track new entries.
    AtCapacity,
}

/// Error returned when rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after_secs: u64,
    pub reason: RateLimitReason,
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        ApiError::RateLimited {
            retry_after_secs: err.retry_after_secs,
        }
    }
}

/// Per-IP rate limiting middleware.
pub async fn ip_rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    let ip = rate_limit.client_ip(&req);
    match rate_limit.check_ip(&ip) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::debug!(client_ip = %ip, reason = ?e.reason, "request rate limited");
            ApiError::from(e).into_response()
        }
    }
}

/// Spawn a background task that periodically cleans up stale entries.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::info!(evicted, "Rate limiter cleanup task evicted stale entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(burst_size: u32, max_entries: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_minute: 60,
            burst_size,
            max_entries,
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_limit_state_disabled() {
        let state = RateLimitState::new(&RateLimitConfig::default(), TrustedProxies::None);
        assert!(!state.is_enabled());
        assert!(state.check_ip("127.0.0.1").is_ok());
    }

    #[test]
    fn test_burst_then_limited() {
        let state = RateLimitState::new(&enabled(5, 1000), TrustedProxies::None);

        for _ in 0..5 {
            assert!(state.check_ip("127.0.0.1").is_ok());
        }
        let err = state.check_ip("127.0.0.1").unwrap_err();
        assert_eq!(err.reason, RateLimitReason::RateLimited);
        assert!(err.retry_after_secs >= 1);

        assert!(state.check_ip("192.168.1.1").is_ok());
    }

    #[test]
    fn test_rate_limit_max_entries() {
        let state = RateLimitState::new(&enabled(5, 3), TrustedProxies::None);

        assert!(state.check_ip("1.1.1.1").is_ok());
        assert!(state.check_ip("2.2.2.2").is_ok());
        assert!(state.check_ip("3.3.3.3").is_ok());

        let err = state.check_ip("4.4.4.4").unwrap_err();
        assert_eq!(err.reason, RateLimitReason::AtCapacity);

        assert!(state.check_ip("1.1.1.1").is_ok());
    }

    #[test]
    fn test_rate_limit_cleanup() {
        let config = RateLimitConfig {
            entry_ttl_secs: 0,
            ..enabled(5, 1000)
        };
        let state = RateLimitState::new(&config, TrustedProxies::None);

        assert!(state.check_ip("1.1.1.1").is_ok());
        assert!(state.check_ip("2.2.2.2").is_ok());
        assert_eq!(state.entry_count(), 2);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(state.cleanup(), 2);
        assert_eq!(state.entry_count(), 0);
    }
}
