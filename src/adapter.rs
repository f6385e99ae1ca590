// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Adapter facade: the CRUD-over-streams surface a service host calls.
//!
//! Lifecycle is `new` → `init(schema)` → `connect()` → operations →
//! `disconnect()`. Every save creates a new revision; nothing is edited in
//! place.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{StoreConfig, StoreOptions, DEFAULT_BUCKET};
use crate::error::{Result, StoreError};
use crate::model::{BlobId, FileFilter, FileMetadata, FileRecord, FindOptions, UploadOptions, UploadReceipt};
use crate::pipeline::{self, DownloadStream, DownloadTarget, Payload};
use crate::store::{self, BlobStore};
use crate::version::{VersionResolver, VersioningPolicy};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The parts of the host's service definition the adapter reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSchema {
    #[serde(default)]
    pub name: String,
    /// Bucket name; `"fs"` when absent.
    #[serde(default)]
    pub collection: Option<String>,
}

/// Caller-supplied metadata for a save.
///
/// `id` wins over `filename`; keys starting with `$` are transport markers
/// and are never stored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SaveMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SaveMeta {
    pub fn named(filename: impl Into<String>) -> Self {
        Self { filename: Some(filename.into()), ..Self::default() }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Resolved filename, content type and stored metadata (version unset).
    fn normalize(self) -> (String, String, FileMetadata) {
        let filename = self
            .id
            .or(self.filename)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let content_type = self.content_type.filter(|c| !c.is_empty()).unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string()
        });
        let mut extra = self.extra;
        extra.retain(|k, _| !k.starts_with('$') && k != "version");
        (filename, content_type, FileMetadata { version: Default::default(), extra })
    }
}

pub struct FsAdapter {
    uri: String,
    options: StoreOptions,
    bucket_name: String,
    resolver: VersionResolver,
    store: Option<Arc<dyn BlobStore>>,
}

impl FsAdapter {
    pub fn new(uri: impl Into<String>, options: StoreOptions) -> Self {
        Self {
            uri: uri.into(),
            options,
            bucket_name: DEFAULT_BUCKET.to_string(),
            resolver: VersionResolver::new(options.versioning),
            store: None,
        }
    }

    /// Adapter for a validated `[store]` section, bucket name included.
    pub fn from_config(config: &StoreConfig) -> Self {
        let mut adapter = Self::new(config.uri.clone(), config.options());
        adapter.bucket_name = config.bucket.clone();
        adapter
    }

    /// Adapter bound to an already opened bucket. No `init`/`connect` needed.
    pub fn with_store(store: Arc<dyn BlobStore>, versioning: VersioningPolicy) -> Self {
        Self {
            uri: String::new(),
            options: StoreOptions { versioning, ..StoreOptions::default() },
            bucket_name: store.bucket_name().to_string(),
            resolver: VersionResolver::new(versioning),
            store: Some(store),
        }
    }

    /// Bind the bucket named by the host schema. Fails without a URI.
    pub fn init(&mut self, schema: &ServiceSchema) -> Result<()> {
        self.bucket_name = schema
            .collection
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        if self.uri.trim().is_empty() {
            return Err(StoreError::Config("Missing `uri` definition".into()));
        }
        debug!(service = schema.name, bucket = self.bucket_name, "Adapter initialised");
        Ok(())
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.store.is_some() {
            return Ok(());
        }
        let store = store::open(&self.uri, &self.bucket_name, self.options)
            .await
            .map_err(|e| match e {
                StoreError::Io(io) => StoreError::StoreUnavailable(io.to_string()),
                other => other,
            })?;
        self.store = Some(store);
        info!(bucket = self.bucket_name, "Blob store adapter has connected successfully");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if self.store.take().is_some() {
            info!(bucket = self.bucket_name, "Blob store adapter has disconnected");
        }
        Ok(())
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn versioning(&self) -> VersioningPolicy {
        self.resolver.policy()
    }

    fn store(&self) -> Result<&dyn BlobStore> {
        self.store
            .as_deref()
            .ok_or_else(|| StoreError::StoreUnavailable("adapter is not connected".into()))
    }

    // ─────────────────────────────── reads ───────────────────────────────────

    /// All records matching `filter`, latest version first.
    pub async fn find(&self, filter: &FileFilter) -> Result<Vec<FileRecord>> {
        let result = match self.store() {
            Ok(store) => store.find(filter, FindOptions::latest_first()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(bucket = self.bucket_name, error = %e, "find failed");
        }
        result
    }

    /// Download the latest-version record matching `filter`.
    pub async fn find_one(&self, filter: &FileFilter) -> Result<DownloadStream> {
        self.find_one_with_cancel(filter, &CancellationToken::new()).await
    }

    pub async fn find_one_with_cancel(
        &self,
        filter: &FileFilter,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream> {
        pipeline::download(self.store()?, &DownloadTarget::Filter(filter.clone()), cancel.clone()).await
    }

    /// Download the latest version of `filename`.
    pub async fn find_by_id(&self, filename: &str) -> Result<DownloadStream> {
        self.find_by_id_with_cancel(filename, &CancellationToken::new()).await
    }

    pub async fn find_by_id_with_cancel(
        &self,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream> {
        let target = DownloadTarget::Filename(filename.to_string());
        pipeline::download(self.store()?, &target, cancel.clone()).await
    }

    /// Not implemented; always `None`.
    pub fn count(&self, _filter: &FileFilter) -> Option<u64> {
        self.report_unimplemented("count");
        None
    }

    // ─────────────────────────────── writes ──────────────────────────────────

    /// Upload `entity` as a new revision of its filename.
    pub async fn save(&self, entity: Payload, meta: SaveMeta) -> Result<UploadReceipt> {
        self.save_with_cancel(entity, meta, &CancellationToken::new()).await
    }

    pub async fn save_with_cancel(
        &self,
        entity: Payload,
        meta: SaveMeta,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt> {
        if !entity.is_stream() {
            return Err(StoreError::BadRequest("Entity is not a stream".into()));
        }
        let store = self.store()?;
        let (filename, content_type, mut metadata) = meta.normalize();

        metadata.version = self.resolver.next_version(store, &filename).await?;
        let options = UploadOptions { metadata, content_type };
        pipeline::upload(store, entity, &filename, options, cancel).await
    }

    /// Same as [`FsAdapter::save`]: an update is always a new version.
    pub async fn update_by_id(&self, entity: Payload, meta: SaveMeta) -> Result<UploadReceipt> {
        self.save(entity, meta).await
    }

    /// Delete one revision. Deleting an id that does not exist succeeds.
    pub async fn remove_by_id(&self, id: &str) -> Result<BlobId> {
        let blob_id: BlobId = id.parse()?;
        match self.store()?.delete(blob_id).await {
            Ok(()) => {
                info!(bucket = self.bucket_name, blob_id = %blob_id, "Blob removed");
                Ok(blob_id)
            }
            Err(e) if e.is_not_found() => {
                debug!(bucket = self.bucket_name, blob_id = %blob_id, "Blob already absent");
                Ok(blob_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Not implemented; deletes nothing.
    pub fn remove_many(&self, _filter: &FileFilter) {
        self.report_unimplemented("remove_many");
    }

    /// Not implemented; deletes nothing.
    pub fn clear(&self) {
        self.report_unimplemented("clear");
    }

    fn report_unimplemented(&self, operation: &'static str) {
        let err = StoreError::Unimplemented { operation };
        info!(bucket = self.bucket_name, code = err.code(), "{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_prefers_id_and_guesses_type() {
        let meta = SaveMeta { id: Some("doc.txt".into()), filename: Some("other.bin".into()), ..Default::default() };
        let (filename, content_type, _) = meta.normalize();
        assert_eq!(filename, "doc.txt");
        assert_eq!(content_type, "text/plain");
    }

    #[test]
    fn test_normalize_synthesizes_filename() {
        let (filename, content_type, _) = SaveMeta::default().normalize();
        assert!(Uuid::parse_str(&filename).is_ok());
        assert_eq!(content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_normalize_strips_transport_markers_and_reserved_version() {
        let meta: SaveMeta = serde_json::from_value(json!({
            "filename": "a.png",
            "$multipart": {"field": "file"},
            "version": "99",
            "owner": "ann"
        }))
        .expect("deserialize");
        let (filename, content_type, metadata) = meta.normalize();
        assert_eq!(filename, "a.png");
        assert_eq!(content_type, "image/png");
        assert_eq!(metadata.extra.len(), 1);
        assert_eq!(metadata.extra.get("owner"), Some(&json!("ann")));
    }

    #[test]
    fn test_init_requires_uri() {
        let mut adapter = FsAdapter::new("", StoreOptions::default());
        let schema = ServiceSchema { name: "files".into(), collection: Some("docs".into()) };
        assert!(matches!(adapter.init(&schema), Err(StoreError::Config(_))));
        assert_eq!(adapter.bucket_name(), "docs");
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_unavailable() {
        let mut adapter = FsAdapter::new("memory://", StoreOptions::default());
        adapter.init(&ServiceSchema::default()).expect("init");
        assert_eq!(adapter.bucket_name(), "fs");
        assert!(matches!(
            adapter.find(&FileFilter::new()).await,
            Err(StoreError::StoreUnavailable(_))
        ));

        adapter.connect().await.expect("connect");
        assert!(adapter.find(&FileFilter::new()).await.expect("find").is_empty());
        adapter.disconnect().await.expect("disconnect");
        assert!(adapter.find_by_id("a").await.is_err());
    }
}
