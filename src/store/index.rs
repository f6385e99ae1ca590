// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! File index — maps (filename, version) → FileRecord.
//!
//! The index lives in memory but is **persistent** for disk buckets: on open,
//! the metadata documents are scanned and the index is rebuilt from them. No
//! separate index file is written.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};

use crate::model::{BlobId, FileFilter, FileRecord, FindOptions, Version};

/// Key for the ordered index: (filename, version, uploaded_at).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey {
    filename: String,
    version: Version,
    uploaded_at: DateTime<Utc>,
    /// tiebreak on blob id
    blob_id: BlobId,
}

impl IndexKey {
    fn of(record: &FileRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            version: record.metadata.version,
            uploaded_at: record.uploaded_at,
            blob_id: record.blob_id,
        }
    }

    /// Inclusive bounds covering every key of `filename`.
    fn span(filename: &str) -> RangeInclusive<Self> {
        let low = Self {
            filename: filename.to_string(),
            version: Version::new(0),
            uploaded_at: DateTime::<Utc>::MIN_UTC,
            blob_id: BlobId::from_bytes([0x00; 16]),
        };
        let high = Self {
            filename: filename.to_string(),
            version: Version::new(u64::MAX),
            uploaded_at: DateTime::<Utc>::MAX_UTC,
            blob_id: BlobId::from_bytes([0xff; 16]),
        };
        low..=high
    }
}

/// In-memory index of all committed records in one bucket.
#[derive(Default)]
pub struct FileIndex {
    entries: BTreeMap<IndexKey, FileRecord>,
    by_id: HashMap<BlobId, IndexKey>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a committed record. Replaces any record with the same id.
    pub fn insert(&mut self, record: FileRecord) {
        self.remove(&record.blob_id);
        let key = IndexKey::of(&record);
        self.by_id.insert(record.blob_id, key.clone());
        self.entries.insert(key, record);
    }

    pub fn remove(&mut self, id: &BlobId) -> Option<FileRecord> {
        let key = self.by_id.remove(id)?;
        self.entries.remove(&key)
    }

    pub fn get(&self, id: &BlobId) -> Option<&FileRecord> {
        self.by_id.get(id).and_then(|key| self.entries.get(key))
    }

    /// Latest revision of `filename`: highest version, newest upload on ties.
    pub fn latest(&self, filename: &str) -> Option<&FileRecord> {
        self.revisions(filename).next_back()
    }

    /// All revisions of `filename` in key order (oldest version first).
    fn revisions(&self, filename: &str) -> impl DoubleEndedIterator<Item = &FileRecord> {
        self.entries.range(IndexKey::span(filename)).map(|(_, r)| r)
    }

    /// Records matching `filter`, ordered by `options.sort` (index order when
    /// unsorted) and truncated to `options.limit`.
    pub fn find(&self, filter: &FileFilter, options: &FindOptions) -> Vec<FileRecord> {
        let mut out: Vec<FileRecord> = match (&filter.blob_id, &filter.filename) {
            (Some(id), _) => self.get(id).filter(|r| filter.matches(r)).cloned().into_iter().collect(),
            (None, Some(name)) => self.revisions(name).filter(|r| filter.matches(r)).cloned().collect(),
            (None, None) => self.entries.values().filter(|r| filter.matches(r)).cloned().collect(),
        };
        if let Some(sort) = options.sort {
            out.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        out
    }

    /// Total number of indexed records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the index from records recovered by scanning a bucket.
    pub fn rebuild_from_scanned(&mut self, records: Vec<FileRecord>) {
        self.entries.clear();
        self.by_id.clear();
        for r in records {
            self.insert(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileMetadata;

    fn record(filename: &str, version: u64) -> FileRecord {
        FileRecord {
            blob_id: BlobId::new(),
            filename: filename.into(),
            content_type: "application/octet-stream".into(),
            length: 0,
            chunk_size: 16,
            uploaded_at: Utc::now(),
            metadata: FileMetadata::with_version(Version::new(version)),
        }
    }

    #[test]
    fn test_latest_and_remove() {
        let mut index = FileIndex::new();
        let v1 = record("a", 1);
        let v2 = record("a", 2);
        index.insert(v1.clone());
        index.insert(v2.clone());
        index.insert(record("b", 9));

        assert_eq!(index.len(), 3);
        assert_eq!(index.latest("a").map(|r| r.blob_id), Some(v2.blob_id));

        assert!(index.remove(&v2.blob_id).is_some());
        assert!(index.remove(&v2.blob_id).is_none());
        assert_eq!(index.latest("a").map(|r| r.blob_id), Some(v1.blob_id));
        assert!(index.latest("missing").is_none());
    }

    #[test]
    fn test_find_sorted_and_limited() {
        let mut index = FileIndex::new();
        for v in 1..=4 {
            index.insert(record("doc", v));
        }
        let found = index.find(&FileFilter::by_filename("doc"), &FindOptions::latest_first().limit(2));
        let versions: Vec<u64> = found.iter().map(|r| r.version().get()).collect();
        assert_eq!(versions, vec![4, 3]);
    }

    #[test]
    fn test_filename_lookup_ignores_neighbouring_names() {
        let mut index = FileIndex::new();
        let exact = record("doc", 1);
        index.insert(exact.clone());
        index.insert(record("do", 7));
        index.insert(record("doc.txt", 5));
        index.insert(record("doc\u{0}", 9));
        index.insert(record("", 3));

        assert_eq!(index.latest("doc").map(|r| r.blob_id), Some(exact.blob_id));
        let found = index.find(&FileFilter::by_filename("doc"), &FindOptions::default());
        assert_eq!(found, vec![exact]);
        assert_eq!(index.latest("").map(|r| r.version().get()), Some(3));
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut index = FileIndex::new();
        index.insert(record("old", 1));
        index.rebuild_from_scanned(vec![record("x", 1), record("y", 1)]);
        assert_eq!(index.len(), 2);
        assert!(index.latest("old").is_none());
    }
}
