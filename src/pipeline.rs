// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Streaming pipeline — producer → bucket (upload) and bucket → consumer
//! (download).
//!
//! ```text
//! upload:   Payload::Stream ──next()──▶ UploadSink::write ──▶ finish() ─▶ UploadReceipt
//!                 ▲                          │
//!                 └──── one item at a time ──┘   (error / cancel ─▶ abort())
//!
//! download: resolve record ──▶ open_download_stream(id) ──▶ DownloadStream
//! ```
//!
//! The producer is polled again only after the sink has accepted the previous
//! item, so a slow store throttles the producer instead of filling memory.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::stream;
use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::model::{BlobId, FileFilter, FileRecord, FindOptions, UploadOptions, UploadReceipt};
use crate::store::{BlobStore, ByteStream, UploadSink};

/// Read size used by [`reader_stream`].
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Upper bound on what [`DownloadStream::read_to_end`] reserves up front.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

// ─────────────────────────────── Payload ─────────────────────────────────────

/// Body handed to `save`. Only [`Payload::Stream`] can be uploaded; the other
/// shapes exist so hosts can forward whatever they received and get a proper
/// bad-request error back.
pub enum Payload {
    Stream(ByteStream),
    Buffer(Bytes),
    Json(Value),
    Empty,
}

impl Payload {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Payload::Stream(Box::pin(stream))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Payload::Stream(reader_stream(reader, DEFAULT_READ_SIZE))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Stream(_) => f.write_str("Payload::Stream(..)"),
            Payload::Buffer(b) => write!(f, "Payload::Buffer({} bytes)", b.len()),
            Payload::Json(v) => write!(f, "Payload::Json({v})"),
            Payload::Empty => f.write_str("Payload::Empty"),
        }
    }
}

/// Adapt an `AsyncRead` into a byte stream of at most `read_size` pieces.
pub fn reader_stream<R>(reader: R, read_size: usize) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(ReaderStream::with_capacity(reader, read_size.max(1)).map(|item| item.map_err(StoreError::Io)))
}

// ─────────────────────────────── upload ──────────────────────────────────────

/// Stream `payload` into a new blob named `filename`.
///
/// Fails with [`StoreError::NotAStream`] before touching the store when the
/// payload is not a stream. Any producer error, sink error or cancellation
/// aborts the write stream and is returned as the single outcome.
pub async fn upload(
    store: &dyn BlobStore,
    payload: Payload,
    filename: &str,
    options: UploadOptions,
    cancel: &CancellationToken,
) -> Result<UploadReceipt> {
    let Payload::Stream(mut source) = payload else {
        return Err(StoreError::NotAStream);
    };
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    let mut sink = store.open_upload_stream(filename, options).await?;
    let blob_id = sink.blob_id();

    if let Err(e) = pump(&mut source, sink.as_mut(), cancel).await {
        if let Err(abort_err) = sink.abort().await {
            warn!(blob_id = %blob_id, error = %abort_err, "Failed to abort upload stream");
        }
        warn!(filename, blob_id = %blob_id, error = %e, "Upload failed");
        return Err(e);
    }

    let record = sink.finish().await?;
    info!(
        bucket = store.bucket_name(),
        filename,
        blob_id = %record.blob_id,
        version = %record.metadata.version,
        bytes = record.length,
        "Upload committed"
    );
    Ok(UploadReceipt::from(&record))
}

async fn pump(
    source: &mut ByteStream,
    sink: &mut dyn UploadSink,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            item = source.next() => item,
        };
        let data = match next {
            None => return Ok(()),
            Some(item) => item?,
        };
        if data.is_empty() {
            continue;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            res = sink.write(data) => res?,
        }
    }
}

// ─────────────────────────────── download ────────────────────────────────────

/// What a download resolves against.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadTarget {
    /// Latest revision of a logical filename.
    Filename(String),
    /// One exact revision.
    Id(BlobId),
    /// Latest revision among the records matching a filter.
    Filter(FileFilter),
}

impl DownloadTarget {
    fn query(&self) -> (FileFilter, FindOptions) {
        let latest = FindOptions::latest_first().limit(1);
        match self {
            DownloadTarget::Filename(name) => (FileFilter::by_filename(name.clone()), latest),
            DownloadTarget::Id(id) => (FileFilter::by_id(*id), latest),
            DownloadTarget::Filter(filter) => (filter.clone(), latest),
        }
    }

    fn describe(&self) -> String {
        match self {
            DownloadTarget::Filename(name) => name.clone(),
            DownloadTarget::Id(id) => format!("blob {id}"),
            DownloadTarget::Filter(filter) => format!("{filter:?}"),
        }
    }
}

/// Lazy byte stream bound to one resolved record. Not restartable.
pub struct DownloadStream {
    record: FileRecord,
    inner: ByteStream,
}

impl DownloadStream {
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Drain the stream into memory.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(self.record.length.min(MAX_PREALLOC) as usize);
        while let Some(chunk) = self.inner.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream").field("record", &self.record).finish_non_exhaustive()
    }
}

/// Resolve `target` and open a read stream on the resolved record.
/// [`StoreError::NotFound`] when nothing matches.
pub async fn download(
    store: &dyn BlobStore,
    target: &DownloadTarget,
    cancel: CancellationToken,
) -> Result<DownloadStream> {
    let (filter, options) = target.query();
    let record = store
        .find(&filter, options)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(target.describe()))?;

    let inner = store.open_download_stream(record.blob_id).await?;
    debug!(
        filename = record.filename,
        blob_id = %record.blob_id,
        version = %record.metadata.version,
        "Download opened"
    );
    Ok(DownloadStream { record, inner: cancellable(inner, cancel) })
}

/// Ends `inner` with a `Cancelled` item once `cancel` fires, dropping the
/// store-side reader.
fn cancellable(mut inner: ByteStream, cancel: CancellationToken) -> ByteStream {
    Box::pin(stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = inner.next() => Some(item),
            };
            match next {
                None => {
                    debug!("Download cancelled");
                    yield Err(StoreError::Cancelled);
                    break;
                }
                Some(None) => break,
                Some(Some(item)) => {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileMetadata, Version};
    use crate::store::MemoryBucket;

    fn opts() -> UploadOptions {
        UploadOptions {
            metadata: FileMetadata::with_version(Version::FIRST),
            content_type: "application/octet-stream".into(),
        }
    }

    fn chunks(parts: &[&'static [u8]]) -> Payload {
        let items: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Payload::stream(tokio_stream::iter(items))
    }

    #[tokio::test]
    async fn test_non_stream_rejected_before_store() {
        let bucket = MemoryBucket::new("fs", 4);
        let never = CancellationToken::new();
        for payload in [Payload::Buffer(Bytes::from_static(b"x")), Payload::Json(Value::Null), Payload::Empty] {
            let err = upload(&bucket, payload, "a", opts(), &never).await.err();
            assert!(matches!(err, Some(StoreError::NotAStream)));
        }
        assert!(bucket.is_empty());
    }

    #[tokio::test]
    async fn test_producer_error_aborts_upload() {
        let bucket = MemoryBucket::new("fs", 4);
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(StoreError::Io(std::io::Error::other("socket reset"))),
        ];
        let err = upload(&bucket, Payload::stream(tokio_stream::iter(items)), "a", opts(), &CancellationToken::new())
            .await
            .err();
        assert!(matches!(err, Some(StoreError::Io(_))));
        assert!(bucket.is_empty());
        assert_eq!(bucket.chunk_sets(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_no_record() {
        let bucket = MemoryBucket::new("fs", 4);
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes>>(1);
        let payload = Payload::stream(tokio_stream::wrappers::ReceiverStream::new(rx));

        tx.send(Ok(Bytes::from_static(b"first"))).await.expect("send");
        let trigger = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
            tx
        });

        let err = upload(&bucket, payload, "a", opts(), &cancel).await.err();
        assert!(matches!(err, Some(StoreError::Cancelled)));
        assert!(bucket.is_empty());
        drop(task.await.expect("join"));
    }

    #[tokio::test]
    async fn test_download_cancel_ends_stream() {
        let bucket = MemoryBucket::new("fs", 2);
        upload(&bucket, chunks(&[b"abcdef"]), "a", opts(), &CancellationToken::new())
            .await
            .expect("upload");

        let cancel = CancellationToken::new();
        let mut stream = download(&bucket, &DownloadTarget::Filename("a".into()), cancel.clone())
            .await
            .expect("download");
        assert_eq!(stream.next().await.expect("item").expect("chunk"), Bytes::from_static(b"ab"));

        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(StoreError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_read_to_end_does_not_trust_recorded_length() {
        let record = FileRecord {
            blob_id: BlobId::new(),
            filename: "huge".into(),
            content_type: "application/octet-stream".into(),
            length: u64::MAX,
            chunk_size: 4,
            uploaded_at: chrono::Utc::now(),
            metadata: FileMetadata::with_version(Version::FIRST),
        };
        let items: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"abc"))];
        let stream = DownloadStream { record, inner: Box::pin(tokio_stream::iter(items)) };
        assert_eq!(stream.read_to_end().await.expect("read"), b"abc");
    }

    #[tokio::test]
    async fn test_reader_stream_respects_read_size() {
        let reader = std::io::Cursor::new(vec![1u8; 10]);
        let mut stream = reader_stream(reader, 4);
        let mut sizes = Vec::new();
        while let Some(piece) = stream.next().await {
            sizes.push(piece.expect("piece").len());
        }
        assert!(sizes.iter().all(|&n| n > 0 && n <= 4));
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn test_reader_stream_uploads_file_contents() {
        let bucket = MemoryBucket::new("fs", 3);
        let reader = std::io::Cursor::new(b"from a reader".to_vec());
        let receipt = upload(&bucket, Payload::from_reader(reader), "r", opts(), &CancellationToken::new())
            .await
            .expect("upload");
        assert_eq!(receipt.length, 13);

        let body = download(&bucket, &DownloadTarget::Id(receipt.blob_id), CancellationToken::new())
            .await
            .expect("download")
            .read_to_end()
            .await
            .expect("read");
        assert_eq!(body, b"from a reader");
    }
}
