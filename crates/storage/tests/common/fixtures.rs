use futures::TryStreamExt;
use imagegate_storage::{ByteStream, StagedBlob};
use std::net::TcpListener;
use tempfile::TempDir;

/// Minimal PNG-signature payload of `len` bytes.
#[allow(dead_code)]
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
    data.resize(len.max(data.len()), 0xAB);
    data
}

/// Write `data` into `dir` and describe it as a staged blob.
#[allow(dead_code)]
pub fn stage(dir: &TempDir, data: &[u8], filename: &str, content_type: &str) -> StagedBlob {
    let path = dir.path().join("staged.upload");
    std::fs::write(&path, data).unwrap();
    StagedBlob {
        path,
        filename: filename.to_string(),
        content_type: content_type.to_string(),
        size: data.len() as u64,
    }
}

/// Drain a byte stream into memory.
#[allow(dead_code)]
pub async fn collect(stream: ByteStream) -> Vec<u8> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
}

#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}
