//! Content sniffing against the image allow-set.
//!
//! The type of an upload is decided from its leading bytes. The client's
//! declared `Content-Type` is never consulted, and the filename extension is
//! only a fallback for binary data that carries no recognisable signature.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 512;

/// Image formats accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageType {
    pub const ALL: [ImageType; 4] = [Self::Jpeg, Self::Png, Self::Gif, Self::Webp];

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// Canonical extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
            Self::Webp => ".webp",
        }
    }

    /// Look up an allow-set member by MIME type. `image/jpg` is accepted as
    /// an alias of `image/jpeg`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Look up an allow-set member by the extension of `filename`
    /// (case-insensitive, `.jpeg` normalized to `.jpg`).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = normalize_extension(filename)?;
        Self::ALL.into_iter().find(|t| t.extension() == ext)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Lowercased extension of `filename` with the leading dot, `.jpeg`
/// mapped to `.jpg`.
pub fn normalize_extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let dot = base.rfind('.')?;
    let ext = base[dot..].to_ascii_lowercase();
    if ext.len() < 2 {
        return None;
    }
    Some(if ext == ".jpeg" { ".jpg".to_string() } else { ext })
}

/// Outcome of inspecting a byte prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniffed {
    /// A signature from the allow-set.
    Image(ImageType),
    /// Conclusively something else (a known signature, or text).
    Other(&'static str),
    /// Binary data with no recognised signature.
    Unknown,
}

/// Inspect at most the first [`SNIFF_LEN`] bytes of `prefix`.
///
/// Shorter inputs are sniffed on whatever is available.
pub fn sniff(prefix: &[u8]) -> Sniffed {
    let window = &prefix[..prefix.len().min(SNIFF_LEN)];

    if window.is_empty() {
        return Sniffed::Other("application/x-empty");
    }

    if let Some(kind) = infer::get(window) {
        return match ImageType::from_mime(kind.mime_type()) {
            Some(image) => Sniffed::Image(image),
            None => Sniffed::Other(kind.mime_type()),
        };
    }

    if looks_like_text(window) {
        return Sniffed::Other("text/plain");
    }

    Sniffed::Unknown
}

/// Decide the trusted type of an upload.
///
/// Signature first; when the data is binary and unrecognised, the declared
/// filename's extension may place it in the allow-set. Anything else is
/// rejected with [`Error::UnsupportedType`](crate::Error::UnsupportedType).
pub fn classify(prefix: &[u8], declared_filename: &str) -> crate::Result<ImageType> {
    match sniff(prefix) {
        Sniffed::Image(image) => Ok(image),
        Sniffed::Other(mime) => Err(crate::Error::UnsupportedType {
            detected: mime.to_string(),
        }),
        Sniffed::Unknown => ImageType::from_filename(declared_filename).ok_or_else(|| {
            crate::Error::UnsupportedType {
                detected: "application/octet-stream".to_string(),
            }
        }),
    }
}

/// True when the window contains no bytes that only occur in binary data.
fn looks_like_text(window: &[u8]) -> bool {
    !window
        .iter()
        .any(|&b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F))
}
