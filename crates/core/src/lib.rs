//! Core domain types and shared logic for the imagegate image host.
//!
//! This crate defines the pieces used by every other crate:
//! - Public handles and the proxy paths derived from them
//! - Content sniffing against the image allow-set
//! - Sanitizers for client-supplied identifiers
//! - Application configuration

pub mod config;
pub mod error;
pub mod handle;
pub mod sanitize;
pub mod sniff;

pub use error::{Error, Result};
pub use handle::PublicHandle;
pub use sanitize::{sanitize_filename, sanitize_ip, sanitize_user_agent};
pub use sniff::{ImageType, SNIFF_LEN, Sniffed, classify, sniff};

/// Path prefix under which uploaded images are served.
pub const FILE_ROUTE_PREFIX: &str = "/file/";
