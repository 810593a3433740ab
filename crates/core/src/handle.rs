//! Public handles: the opaque, client-facing identifier of one upload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique public handle (128-bit random token).
///
/// A handle is assigned once when the upload record is created and never
/// changes or gets reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicHandle(Uuid);

impl PublicHandle {
    /// Generate a new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a handle as it appears in a URL path segment.
    ///
    /// Accepts the bare token or the token followed by a file extension
    /// (`<uuid>.png`); the extension is ignored for lookup purposes.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let token = match s.find('.') {
            Some(dot) => &s[..dot],
            None => s,
        };
        Uuid::parse_str(token)
            .map(Self)
            .map_err(|e| crate::Error::InvalidHandle(format!("{s}: {e}")))
    }

    /// Public path fragment under which the handle is served,
    /// e.g. `/file/<uuid>.png`.
    pub fn proxy_path(&self, extension: &str) -> String {
        format!("{}{}{}", crate::FILE_ROUTE_PREFIX, self.0, extension)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PublicHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for PublicHandle {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for PublicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicHandle({})", self.0)
    }
}

impl fmt::Display for PublicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
