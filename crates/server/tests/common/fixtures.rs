//! Test fixtures for generating test data.

use axum::body::Body;
use axum::http::{Request, header};

/// Multipart boundary used by the request builders.
pub const BOUNDARY: &str = "imagegate-test-boundary";

/// Raw admin token matching `AdminConfig::for_testing()`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
const GIF_MAGIC: &[u8] = b"GIF89a\x01\0\x01\0";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// A PNG-signed blob of exactly `len` bytes.
#[allow(dead_code)]
pub fn png_bytes(len: usize) -> Vec<u8> {
    with_magic(PNG_MAGIC, len)
}

/// A GIF-signed blob of exactly `len` bytes.
#[allow(dead_code)]
pub fn gif_bytes(len: usize) -> Vec<u8> {
    with_magic(GIF_MAGIC, len)
}

fn with_magic(magic: &[u8], len: usize) -> Vec<u8> {
    let mut data = magic.to_vec();
    data.extend(seeded_bytes(len as u64, len.saturating_sub(magic.len())));
    data.truncate(len);
    data
}

/// Encode one multipart file field.
pub fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Build a multipart request against `/upload` carrying `field`.
#[allow(dead_code)]
pub fn upload_request_with_field(
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::HOST, "img.test")
        .header(header::USER_AGENT, "imagegate-tests/1.0")
        .body(Body::from(multipart_body(field, filename, content_type, data)))
        .unwrap()
}

/// Build a multipart upload request for the `image` field.
#[allow(dead_code)]
pub fn upload_request(filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    upload_request_with_field("image", filename, content_type, data)
}

/// Build an admin toggle request, optionally authenticated.
#[allow(dead_code)]
pub fn toggle_request(id: i64, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/admin/toggle/{id}"));
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}
