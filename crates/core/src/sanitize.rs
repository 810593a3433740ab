//! Normalization of client-supplied identifiers.
//!
//! Every function here is total: malformed input degrades to a safe value
//! instead of an error.

use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use time::OffsetDateTime;
use time::macros::format_description;

/// Maximum stored user-agent length in bytes.
pub const MAX_USER_AGENT_BYTES: usize = 255;

/// Maximum stored filename length in code points.
pub const MAX_FILENAME_CHARS: usize = 100;

/// Placeholder recorded when the client address cannot be parsed.
pub const UNKNOWN_IP: &str = "unknown";

static USER_AGENT_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_ \t\-.,;:/()]").expect("static user-agent pattern is valid")
});

static FILENAME_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*\p{Cc}]"#).expect("static filename pattern is valid")
});

/// Normalize a client address.
///
/// Accepts `host:port`, `[v6]:port`, a bare address, or an
/// `X-Forwarded-For` chain (the left-most entry is used). Anything else
/// becomes `"unknown"`.
pub fn sanitize_ip(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or_default().trim();

    if let Ok(addr) = first.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }

    let bare = first
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(first);

    match bare.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => UNKNOWN_IP.to_string(),
    }
}

/// Strip characters outside word characters, blanks and `-.,;:/()`, then
/// truncate to 255 bytes.
pub fn sanitize_user_agent(raw: &str) -> String {
    let cleaned = USER_AGENT_DISALLOWED.replace_all(raw, "");
    // Only ASCII survives the filter, so any byte offset is a char boundary.
    let end = cleaned.len().min(MAX_USER_AGENT_BYTES);
    cleaned[..end].to_string()
}

/// Reduce a client filename to a safe basename of at most 100 code points.
///
/// Directory components and filesystem-hostile characters are removed. An
/// empty result is replaced by `image_<YYYYMMDDHHMMSS>` (UTC). The function
/// is idempotent.
pub fn sanitize_filename(raw: &str) -> String {
    sanitize_filename_at(raw, OffsetDateTime::now_utc())
}

/// [`sanitize_filename`] with an explicit clock for the fallback name.
pub fn sanitize_filename_at(raw: &str, now: OffsetDateTime) -> String {
    let trimmed = raw.trim_end_matches(['/', '\\']);
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned = FILENAME_DISALLOWED.replace_all(base, "");
    let truncated: String = cleaned.chars().take(MAX_FILENAME_CHARS).collect();
    let name = truncated.trim();

    if name.is_empty() || name == "." || name == ".." {
        return fallback_filename(now);
    }
    name.to_string()
}

fn fallback_filename(now: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day][hour][minute][second]");
    match now.format(&format) {
        Ok(stamp) => format!("image_{stamp}"),
        Err(_) => format!("image_{}", now.unix_timestamp()),
    }
}
