// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Disk bucket — chunk files plus one JSON metadata document per blob.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/<bucket>/files/<blob_id>.json        metadata document
//! <root>/<bucket>/chunks/<blob_id>/000000.chunk
//! <root>/<bucket>/chunks/<blob_id>/000001.chunk
//! ```
//!
//! ## Chunk File Layout
//!
//! ```text
//! [ChunkHeader : 32 bytes]
//!   magic      : [u8;8]  = b"GSCHUNK0"
//!   blob_id    : [u8;16]
//!   index      : u32     (LE)
//!   data_len   : u32     (LE)
//!
//! [raw data    : data_len bytes]
//! ```
//!
//! The metadata document is written last (tmp file + rename), so a blob is
//! visible only once all of its chunks are on disk. Chunk directories without
//! a document are leftovers of interrupted uploads and are swept on open.

use std::collections::HashSet;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::model::{BlobId, FileFilter, FileRecord, FindOptions, UploadOptions};
use crate::store::index::FileIndex;
use crate::store::{length_mismatch, BlobStore, ByteStream, Chunker, UploadSink};

// ─────────────────────────────── constants ───────────────────────────────────

pub const CHUNK_MAGIC: &[u8; 8] = b"GSCHUNK0";
pub const CHUNK_HEADER_SIZE: usize = 8 + 16 + 4 + 4; // 32 bytes

/// Extension of a metadata document that is still being committed.
const TEMP_DOC_EXTENSION: &str = "json.tmp";

// ─────────────────────────────── DiskBucket ──────────────────────────────────

pub struct DiskBucket {
    name: String,
    chunk_size: usize,
    files_dir: PathBuf,
    chunks_dir: PathBuf,
    index: Arc<RwLock<FileIndex>>,
}

impl DiskBucket {
    /// Open (or create) the bucket under `root` and rebuild its index from
    /// the metadata documents already on disk.
    pub async fn open(root: PathBuf, name: &str, chunk_size: usize) -> Result<Self> {
        let base = root.join(name);
        let files_dir = base.join("files");
        let chunks_dir = base.join("chunks");
        for dir in [&files_dir, &chunks_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StoreError::StoreUnavailable(format!("Cannot create bucket dir {dir:?}: {e}"))
            })?;
        }

        let stale = sweep_temp_documents(&files_dir).await?;
        if stale > 0 {
            warn!(bucket = name, stale, "Removed uncommitted metadata documents");
        }
        let records = scan_documents(&files_dir).await?;
        let live: HashSet<BlobId> = records.iter().map(|r| r.blob_id).collect();
        let swept = sweep_orphans(&chunks_dir, &live).await?;
        if swept > 0 {
            warn!(bucket = name, swept, "Removed chunk sets of interrupted uploads");
        }

        let mut index = FileIndex::new();
        let count = records.len();
        index.rebuild_from_scanned(records);
        info!(bucket = name, path = ?base, recovered = count, "Disk bucket opened");

        Ok(Self {
            name: name.to_string(),
            chunk_size: chunk_size.max(1),
            files_dir,
            chunks_dir,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chunk_stream(&self, record: FileRecord) -> ByteStream {
        let blob_dir = self.chunks_dir.join(record.blob_id.to_string());
        Box::pin(stream! {
            let mut streamed: u64 = 0;
            for n in 0..record.chunk_count() {
                match read_chunk(&blob_dir, &record.blob_id, n).await {
                    Ok(chunk) => {
                        streamed += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(e);
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
impl BlobStore for DiskBucket {
    fn bucket_name(&self) -> &str {
        &self.name
    }

    async fn open_upload_stream(
        &self,
        filename: &str,
        options: UploadOptions,
    ) -> Result<Box<dyn UploadSink>> {
        let blob_id = BlobId::new();
        Ok(Box::new(DiskSink {
            blob_id,
            filename: filename.to_string(),
            options,
            chunk_size: self.chunk_size,
            chunker: Chunker::new(self.chunk_size),
            next_index: 0,
            length: 0,
            blob_dir: self.chunks_dir.join(blob_id.to_string()),
            files_dir: self.files_dir.clone(),
            index: self.index.clone(),
            done: false,
        }))
    }

    async fn open_download_stream(&self, id: BlobId) -> Result<ByteStream> {
        let record = self
            .index
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {id}")))?;
        Ok(self.chunk_stream(record))
    }

    async fn open_download_stream_by_name(&self, filename: &str) -> Result<ByteStream> {
        let record = self
            .index
            .read()
            .latest(filename)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(filename.to_string()))?;
        Ok(self.chunk_stream(record))
    }

    async fn find(&self, filter: &FileFilter, options: FindOptions) -> Result<Vec<FileRecord>> {
        Ok(self.index.read().find(filter, &options))
    }

    async fn delete(&self, id: BlobId) -> Result<()> {
        let record = self.index.write().remove(&id);
        let Some(record) = record else {
            return Err(StoreError::NotFound(format!("blob {id}")));
        };

        // Document first: a crash in between leaves only orphan chunks.
        if let Err(e) = ignore_missing(fs::remove_file(document_path(&self.files_dir, &id)).await) {
            self.index.write().insert(record);
            return Err(e.into());
        }
        ignore_missing(fs::remove_dir_all(self.chunks_dir.join(id.to_string())).await)?;
        debug!(bucket = self.name, blob_id = %id, filename = record.filename, "Blob deleted");
        Ok(())
    }
}

// ─────────────────────────────── DiskSink ────────────────────────────────────

struct DiskSink {
    blob_id: BlobId,
    filename: String,
    options: UploadOptions,
    chunk_size: usize,
    chunker: Chunker,
    next_index: u32,
    length: u64,
    blob_dir: PathBuf,
    files_dir: PathBuf,
    index: Arc<RwLock<FileIndex>>,
    /// Set once committed or aborted; otherwise Drop cleans up.
    done: bool,
}

impl DiskSink {
    async fn write_chunk(&mut self, data: Bytes) -> Result<()> {
        if self.next_index == 0 {
            fs::create_dir_all(&self.blob_dir).await?;
        }
        let path = chunk_path(&self.blob_dir, self.next_index);
        fs::write(&path, encode_chunk(&self.blob_id, self.next_index, &data)?).await?;
        self.next_index += 1;
        Ok(())
    }
}

#[async_trait]
impl UploadSink for DiskSink {
    fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.length += data.len() as u64;
        for chunk in self.chunker.push(&data) {
            self.write_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<FileRecord> {
        if let Some(tail) = self.chunker.finish() {
            self.write_chunk(tail).await?;
        }
        let record = FileRecord {
            blob_id: self.blob_id,
            filename: self.filename.clone(),
            content_type: self.options.content_type.clone(),
            length: self.length,
            chunk_size: self.chunk_size,
            uploaded_at: Utc::now(),
            metadata: self.options.metadata.clone(),
        };

        let doc = document_path(&self.files_dir, &self.blob_id);
        let tmp = doc.with_extension(TEMP_DOC_EXTENSION);
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?).await?;
        fs::rename(&tmp, &doc).await?;

        self.index.write().insert(record.clone());
        self.done = true;
        Ok(record)
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.done = true;
        ignore_missing(fs::remove_dir_all(&self.blob_dir).await)?;
        debug!(blob_id = %self.blob_id, chunks = self.next_index, "Upload aborted");
        Ok(())
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        if self.done || self.next_index == 0 {
            return;
        }
        let dir = std::mem::take(&mut self.blob_dir);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = fs::remove_dir_all(&dir).await;
                });
            }
            // Swept on the next open.
            Err(_) => warn!(path = ?dir, "Upload dropped outside a runtime, chunks left behind"),
        }
    }
}

// ─────────────────────────────── helpers ─────────────────────────────────────

fn document_path(files_dir: &Path, id: &BlobId) -> PathBuf {
    files_dir.join(format!("{id}.json"))
}

fn chunk_path(blob_dir: &Path, n: u32) -> PathBuf {
    blob_dir.join(format!("{n:06}.chunk"))
}

fn ignore_missing(res: std::io::Result<()>) -> std::io::Result<()> {
    match res {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Serialize one chunk with its header.
pub fn encode_chunk(id: &BlobId, n: u32, data: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + data.len());
    buf.extend_from_slice(CHUNK_MAGIC);
    buf.extend_from_slice(id.as_bytes());
    buf.write_u32::<LittleEndian>(n)?;
    buf.write_u32::<LittleEndian>(data.len() as u32)?;
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Validate a chunk file against the blob and position it was read for.
pub fn decode_chunk(raw: Vec<u8>, id: &BlobId, n: u32) -> Result<Bytes> {
    let corrupt = |what: &str| StoreError::Io(std::io::Error::new(
        ErrorKind::InvalidData,
        format!("chunk {n} of blob {id}: {what}"),
    ));

    let mut cur = Cursor::new(&raw);
    let mut magic = [0u8; 8];
    cur.read_exact(&mut magic).map_err(|_| corrupt("truncated header"))?;
    if &magic != CHUNK_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let mut owner = [0u8; 16];
    cur.read_exact(&mut owner).map_err(|_| corrupt("truncated header"))?;
    if BlobId::from_bytes(owner) != *id {
        return Err(corrupt("belongs to another blob"));
    }
    let index = cur.read_u32::<LittleEndian>()?;
    let data_len = cur.read_u32::<LittleEndian>()? as usize;
    if index != n {
        return Err(corrupt("out of order"));
    }
    if raw.len() != CHUNK_HEADER_SIZE + data_len {
        return Err(corrupt("length mismatch"));
    }
    Ok(Bytes::from(raw).slice(CHUNK_HEADER_SIZE..))
}

async fn read_chunk(blob_dir: &Path, id: &BlobId, n: u32) -> Result<Bytes> {
    let raw = fs::read(chunk_path(blob_dir, n)).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(format!("chunk {n} of blob {id}")),
        _ => StoreError::Io(e),
    })?;
    decode_chunk(raw, id, n)
}

async fn scan_documents(files_dir: &Path) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    let mut entries = fs::read_dir(files_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<FileRecord>(&raw).map_err(StoreError::from),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(record) if record.checked_chunk_count().is_none() => warn!(
                path = ?path,
                length = record.length,
                chunk_size = record.chunk_size,
                "Skipping metadata document with impossible chunk layout"
            ),
            Ok(record) => records.push(record),
            Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable metadata document"),
        }
    }
    Ok(records)
}

/// Delete documents left behind by a commit interrupted before its rename.
async fn sweep_temp_documents(files_dir: &Path) -> Result<usize> {
    let mut swept = 0;
    let mut entries = fs::read_dir(files_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_temp = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(&format!(".{TEMP_DOC_EXTENSION}")));
        if is_temp {
            ignore_missing(fs::remove_file(entry.path()).await)?;
            swept += 1;
        }
    }
    Ok(swept)
}

async fn sweep_orphans(chunks_dir: &Path, live: &HashSet<BlobId>) -> Result<usize> {
    let mut swept = 0;
    let mut entries = fs::read_dir(chunks_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let owned = name
            .to_str()
            .and_then(|s| s.parse::<BlobId>().ok())
            .is_some_and(|id| live.contains(&id));
        if !owned {
            ignore_missing(fs::remove_dir_all(entry.path()).await)?;
            swept += 1;
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_header_layout() {
        let id = BlobId::new();
        let raw = encode_chunk(&id, 3, b"abc").expect("encode");
        assert_eq!(raw.len(), CHUNK_HEADER_SIZE + 3);
        assert_eq!(&raw[..8], CHUNK_MAGIC);
        assert_eq!(decode_chunk(raw, &id, 3).expect("decode"), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_decode_rejects_foreign_or_misplaced_chunk() {
        let id = BlobId::new();
        let raw = encode_chunk(&id, 0, b"abc").expect("encode");
        assert!(decode_chunk(raw.clone(), &BlobId::new(), 0).is_err());
        assert!(decode_chunk(raw.clone(), &id, 1).is_err());
        assert!(decode_chunk(raw[..10].to_vec(), &id, 0).is_err());
    }
}
