//! Blob store backends.

pub mod filesystem;
pub mod telegram;

use crate::error::StorageError;
use crate::traits::ByteStream;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

/// Default chunk size for streaming reads (64 KiB).
pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Stream an open file in fixed-size chunks instead of loading it into memory.
pub(crate) fn file_stream(file: tokio::fs::File) -> ByteStream {
    let stream = async_stream::try_stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await.map_err(StorageError::Io)?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    Box::pin(stream)
}
