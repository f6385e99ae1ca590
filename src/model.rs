// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Records, filters and identifiers shared by the buckets and the adapter.
//!
//! A [`FileRecord`] is the metadata document of one immutable blob revision.
//! On the wire it keeps the GridFS field names (`_id`, `contentType`,
//! `uploadDate`, ...) and stores `metadata.version` as a string.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreError;

// ─────────────────────────────── BlobId ──────────────────────────────────────

/// Opaque, store-assigned identifier of one blob revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(Uuid);

impl BlobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for BlobId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| StoreError::InvalidId(s.to_string()))
    }
}

impl Serialize for BlobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────── Version ─────────────────────────────────────

/// Revision number of a logical filename. `0` only ever appears when a stored
/// version could not be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub const FIRST: Version = Version(1);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Leading-digit parse: `"3"` and `"3rc"` are 3, anything else is 0.
    pub fn parse_lenient(s: &str) -> Self {
        let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        Self(digits.parse().unwrap_or(0))
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::parse_lenient(s),
            Value::Number(n) => Self(n.as_u64().unwrap_or(0)),
            _ => Self(0),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ─────────────────────────────── FileRecord ──────────────────────────────────

/// Application metadata: the reserved version plus an open extension map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub version: Version,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMetadata {
    pub fn with_version(version: Version) -> Self {
        Self { version, extra: Map::new() }
    }
}

/// Metadata document of one physical blob revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub blob_id: BlobId,
    pub filename: String,
    pub content_type: String,
    pub length: u64,
    pub chunk_size: usize,
    #[serde(rename = "uploadDate")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl FileRecord {
    pub fn version(&self) -> Version {
        self.metadata.version
    }

    /// Number of chunks the payload occupies. `None` when `length` and
    /// `chunk_size` describe no valid layout (zero chunk size for a non-empty
    /// blob, or more chunks than a `u32` index can address).
    pub fn checked_chunk_count(&self) -> Option<u32> {
        if self.length == 0 {
            return Some(0);
        }
        if self.chunk_size == 0 {
            return None;
        }
        u32::try_from(self.length.div_ceil(self.chunk_size as u64)).ok()
    }

    /// Number of chunks the payload occupies. Only meaningful for records
    /// that passed [`FileRecord::checked_chunk_count`].
    pub fn chunk_count(&self) -> u32 {
        self.checked_chunk_count().unwrap_or(0)
    }
}

// ─────────────────────────────── Filters ─────────────────────────────────────

/// Conjunctive equality filter over file records. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileFilter {
    pub filename: Option<String>,
    pub blob_id: Option<BlobId>,
    pub content_type: Option<String>,
    pub version: Option<Version>,
    pub metadata: Map<String, Value>,
}

impl FileFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_filename(filename: impl Into<String>) -> Self {
        Self::new().filename(filename)
    }

    pub fn by_id(id: BlobId) -> Self {
        Self { blob_id: Some(id), ..Self::default() }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        self.filename.as_ref().is_none_or(|f| *f == record.filename)
            && self.blob_id.is_none_or(|id| id == record.blob_id)
            && self.content_type.as_ref().is_none_or(|c| *c == record.content_type)
            && self.version.is_none_or(|v| v == record.metadata.version)
            && self
                .metadata
                .iter()
                .all(|(k, v)| record.metadata.extra.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Version,
    UploadedAt,
    Length,
    Filename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub direction: Direction,
}

impl Sort {
    /// Ties are broken by upload time in the same direction, so that of two
    /// records sharing a version the newest upload sorts first when descending.
    pub fn compare(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        let primary = match self.field {
            SortField::Version => a.metadata.version.cmp(&b.metadata.version),
            SortField::UploadedAt => a.uploaded_at.cmp(&b.uploaded_at),
            SortField::Length => a.length.cmp(&b.length),
            SortField::Filename => a.filename.cmp(&b.filename),
        };
        let ord = primary.then_with(|| a.uploaded_at.cmp(&b.uploaded_at));
        match self.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Version descending: the latest revision first.
    pub fn latest_first() -> Self {
        Self {
            sort: Some(Sort { field: SortField::Version, direction: Direction::Descending }),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ─────────────────────────────── Upload types ────────────────────────────────

/// Tags attached to a new write stream.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub metadata: FileMetadata,
    pub content_type: String,
}

/// Handle identifying a committed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub blob_id: BlobId,
    pub filename: String,
    pub version: Version,
    pub length: u64,
    pub content_type: String,
}

impl From<&FileRecord> for UploadReceipt {
    fn from(record: &FileRecord) -> Self {
        Self {
            blob_id: record.blob_id,
            filename: record.filename.clone(),
            version: record.metadata.version,
            length: record.length,
            content_type: record.content_type.clone(),
        }
    }
}
