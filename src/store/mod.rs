// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Blob store seam — chunked buckets + metadata index.
//!
//! The adapter only ever talks to a bucket through [`BlobStore`] and the
//! [`UploadSink`] it hands out. Two buckets ship with the crate:
//!
//! ```text
//! memory://                 → MemoryBucket (process-local)
//! file:///var/lib/blobs     → DiskBucket   (<root>/<bucket>/{files,chunks})
//! ```

pub mod disk;
pub mod index;
pub mod memory;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio_stream::Stream;

use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::model::{BlobId, FileFilter, FileRecord, FindOptions, UploadOptions};

pub use disk::DiskBucket;
pub use memory::MemoryBucket;

/// Lazy, finite sequence of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Write half of one upload. Nothing becomes visible to `find` until
/// [`UploadSink::finish`] succeeds; dropping or aborting discards staged chunks.
#[async_trait]
pub trait UploadSink: Send {
    fn blob_id(&self) -> BlobId;

    /// Accept the next piece of the payload. Returns once the store has
    /// taken it, which is what throttles the producer.
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Flush the trailing partial chunk and commit the metadata document.
    async fn finish(self: Box<Self>) -> Result<FileRecord>;

    /// Release the stream and drop everything staged so far.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Chunked bucket with a queryable metadata index.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket_name(&self) -> &str;

    async fn open_upload_stream(
        &self,
        filename: &str,
        options: UploadOptions,
    ) -> Result<Box<dyn UploadSink>>;

    async fn open_download_stream(&self, id: BlobId) -> Result<ByteStream>;

    /// Stream the latest revision of `filename`.
    async fn open_download_stream_by_name(&self, filename: &str) -> Result<ByteStream>;

    async fn find(&self, filter: &FileFilter, options: FindOptions) -> Result<Vec<FileRecord>>;

    /// Remove metadata and chunks of `id`. `NotFound` when no such record.
    async fn delete(&self, id: BlobId) -> Result<()>;
}

/// Open the bucket named by a connection `uri`.
pub async fn open(uri: &str, bucket: &str, options: StoreOptions) -> Result<Arc<dyn BlobStore>> {
    if uri.starts_with("memory://") {
        return Ok(Arc::new(MemoryBucket::new(bucket, options.chunk_size)));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            return Err(StoreError::Config(format!("No path in store URI '{uri}'")));
        }
        let bucket = DiskBucket::open(PathBuf::from(path), bucket, options.chunk_size).await?;
        return Ok(Arc::new(bucket));
    }
    Err(StoreError::Config(format!("Unsupported store URI '{uri}'")))
}

/// Error item ending a chunk stream whose bytes do not add up to the length
/// recorded in its metadata document.
pub(crate) fn length_mismatch(record: &FileRecord, streamed: u64) -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("blob {} streamed {streamed} bytes, record says {}", record.blob_id, record.length),
    ))
}

/// Re-slices arbitrarily sized writes into fixed-size chunks.
#[derive(Debug)]
pub(crate) struct Chunker {
    chunk_size: usize,
    buf: BytesMut,
}

impl Chunker {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), buf: BytesMut::new() }
    }

    /// Append `data` and return every chunk that is now full.
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut full = Vec::with_capacity(self.buf.len() / self.chunk_size);
        while self.buf.len() >= self.chunk_size {
            full.push(self.buf.split_to(self.chunk_size).freeze());
        }
        full
    }

    /// Trailing partial chunk, if any.
    pub(crate) fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_splits_and_keeps_remainder() {
        let mut chunker = Chunker::new(4);
        assert!(chunker.push(b"ab").is_empty());
        let full = chunker.push(b"cdefghij");
        assert_eq!(full, vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")]);
        assert_eq!(chunker.finish(), Some(Bytes::from_static(b"ij")));
        assert_eq!(chunker.finish(), None);
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        let err = open("mongodb://localhost", "fs", StoreOptions::default()).await.err();
        assert!(matches!(err, Some(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_memory_bucket() {
        let store = open("memory://", "docs", StoreOptions::default()).await.expect("open");
        assert_eq!(store.bucket_name(), "docs");
    }
}
