// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Process-local bucket. Chunks live in a map keyed by blob id, the metadata
//! documents in a [`FileIndex`]. Backs the `memory://` URI and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{BlobId, FileFilter, FileRecord, FindOptions, UploadOptions};
use crate::store::index::FileIndex;
use crate::store::{length_mismatch, BlobStore, ByteStream, Chunker, UploadSink};

#[derive(Default)]
struct Inner {
    index: FileIndex,
    chunks: HashMap<BlobId, Vec<Bytes>>,
}

type Shared = Arc<RwLock<Inner>>;

pub struct MemoryBucket {
    name: String,
    chunk_size: usize,
    inner: Shared,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>, chunk_size: usize) -> Self {
        Self { name: name.into(), chunk_size: chunk_size.max(1), inner: Shared::default() }
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blobs that have chunk data. Matches `len()` unless an upload
    /// leaked.
    pub fn chunk_sets(&self) -> usize {
        self.inner.read().chunks.len()
    }

    fn chunk_stream(&self, record: FileRecord) -> ByteStream {
        let inner = self.inner.clone();
        Box::pin(stream! {
            let mut streamed: u64 = 0;
            for n in 0..record.chunk_count() as usize {
                let chunk = inner
                    .read()
                    .chunks
                    .get(&record.blob_id)
                    .and_then(|chunks| chunks.get(n).cloned());
                match chunk {
                    Some(chunk) => {
                        streamed += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    None => {
                        yield Err(StoreError::NotFound(format!(
                            "chunk {n} of blob {}",
                            record.blob_id
                        )));
                        return;
                    }
                }
            }
            if streamed != record.length {
                yield Err(length_mismatch(&record, streamed));
            }
        })
    }
}

#[async_trait]
impl BlobStore for MemoryBucket {
    fn bucket_name(&self) -> &str {
        &self.name
    }

    async fn open_upload_stream(
        &self,
        filename: &str,
        options: UploadOptions,
    ) -> Result<Box<dyn UploadSink>> {
        Ok(Box::new(MemorySink {
            blob_id: BlobId::new(),
            filename: filename.to_string(),
            options,
            chunk_size: self.chunk_size,
            chunker: Chunker::new(self.chunk_size),
            staged: Vec::new(),
            length: 0,
            inner: self.inner.clone(),
        }))
    }

    async fn open_download_stream(&self, id: BlobId) -> Result<ByteStream> {
        let record = self
            .inner
            .read()
            .index
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {id}")))?;
        Ok(self.chunk_stream(record))
    }

    async fn open_download_stream_by_name(&self, filename: &str) -> Result<ByteStream> {
        let record = self
            .inner
            .read()
            .index
            .latest(filename)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(filename.to_string()))?;
        Ok(self.chunk_stream(record))
    }

    async fn find(&self, filter: &FileFilter, options: FindOptions) -> Result<Vec<FileRecord>> {
        Ok(self.inner.read().index.find(filter, &options))
    }

    async fn delete(&self, id: BlobId) -> Result<()> {
        let mut inner = self.inner.write();
        let record = inner.index.remove(&id);
        inner.chunks.remove(&id);
        match record {
            Some(r) => {
                debug!(bucket = self.name, blob_id = %id, filename = r.filename, "Blob deleted");
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("blob {id}"))),
        }
    }
}

struct MemorySink {
    blob_id: BlobId,
    filename: String,
    options: UploadOptions,
    chunk_size: usize,
    chunker: Chunker,
    staged: Vec<Bytes>,
    length: u64,
    inner: Shared,
}

#[async_trait]
impl UploadSink for MemorySink {
    fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.length += data.len() as u64;
        let full = self.chunker.push(&data);
        self.staged.extend(full);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<FileRecord> {
        let MemorySink { blob_id, filename, options, chunk_size, mut chunker, mut staged, length, inner } =
            *self;
        if let Some(tail) = chunker.finish() {
            staged.push(tail);
        }
        let record = FileRecord {
            blob_id,
            filename,
            content_type: options.content_type,
            length,
            chunk_size,
            uploaded_at: Utc::now(),
            metadata: options.metadata,
        };
        let mut guard = inner.write();
        guard.chunks.insert(blob_id, staged);
        guard.index.insert(record.clone());
        Ok(record)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        debug!(blob_id = %self.blob_id, staged = self.staged.len(), "Upload aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileMetadata, Version};
    use tokio_stream::StreamExt;

    fn opts() -> UploadOptions {
        UploadOptions {
            metadata: FileMetadata::with_version(Version::FIRST),
            content_type: "text/plain".into(),
        }
    }

    #[tokio::test]
    async fn test_commit_only_on_finish() {
        let bucket = MemoryBucket::new("fs", 3);
        let mut sink = bucket.open_upload_stream("a.txt", opts()).await.expect("open");
        sink.write(Bytes::from_static(b"hello")).await.expect("write");
        assert!(bucket.is_empty());

        let record = sink.finish().await.expect("finish");
        assert_eq!(record.length, 5);
        assert_eq!(record.chunk_count(), 2);
        assert_eq!(bucket.len(), 1);

        let mut stream = bucket.open_download_stream(record.blob_id).await.expect("download");
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.expect("chunk"));
        }
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing() {
        let bucket = MemoryBucket::new("fs", 3);
        let mut sink = bucket.open_upload_stream("a.txt", opts()).await.expect("open");
        sink.write(Bytes::from_static(b"partial")).await.expect("write");
        sink.abort().await.expect("abort");
        assert!(bucket.is_empty());
        assert_eq!(bucket.chunk_sets(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let bucket = MemoryBucket::new("fs", 3);
        let err = bucket.delete(BlobId::new()).await.err();
        assert!(matches!(err, Some(StoreError::NotFound(_))));
    }
}
