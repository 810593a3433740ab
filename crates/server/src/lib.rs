//! HTTP gateway for the imagegate image host.
//!
//! This crate provides:
//! - Upload admission and the streaming validate-store-record pipeline
//! - Handle resolution with a TTL cache in front of the record store
//! - Proxied file delivery with long-lived cache headers
//! - Admin toggle, health and metrics endpoints

pub mod admission;
pub mod auth;
pub mod client;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod ratelimit;
pub mod resolve;
pub mod routes;
pub mod state;

pub use admission::{AdmissionGate, Busy, Ticket};
pub use auth::TraceId;
pub use error::ApiError;
pub use ratelimit::RateLimitState;
pub use resolve::ResolutionCache;
pub use routes::create_router;
pub use state::AppState;
