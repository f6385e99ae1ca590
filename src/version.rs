// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Version resolution: the next revision number for a logical filename.
//!
//! This is a read-then-write with no exclusivity. Two concurrent saves of the
//! same filename can observe the same latest record and both assign `V + 1`;
//! the index then orders the duplicates by upload time.

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{FileFilter, FindOptions, Version};
use crate::store::BlobStore;

/// What to do when the lookup of the previous version fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersioningPolicy {
    /// Log the failure and assign version 1 so the write can proceed.
    #[default]
    BestEffort,
    /// Return the lookup error and abort the save.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionResolver {
    policy: VersioningPolicy,
}

impl VersionResolver {
    pub fn new(policy: VersioningPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> VersioningPolicy {
        self.policy
    }

    /// Version to assign to a new upload of `filename`.
    pub async fn next_version(&self, store: &dyn BlobStore, filename: &str) -> Result<Version> {
        let latest = store
            .find(&FileFilter::by_filename(filename), FindOptions::latest_first().limit(1))
            .await;

        match latest {
            Ok(records) => {
                let next = records
                    .first()
                    .map(|r| r.metadata.version.next())
                    .unwrap_or(Version::FIRST);
                debug!(filename, version = %next, "Version resolved");
                Ok(next)
            }
            Err(e) => match self.policy {
                VersioningPolicy::BestEffort => {
                    warn!(filename, error = %e, "Version lookup failed, assigning version 1");
                    Ok(Version::FIRST)
                }
                VersioningPolicy::Strict => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileMetadata, UploadOptions};
    use crate::store::MemoryBucket;
    use bytes::Bytes;

    async fn put(bucket: &MemoryBucket, filename: &str, version: Version) {
        let opts = UploadOptions {
            metadata: FileMetadata::with_version(version),
            content_type: "text/plain".into(),
        };
        let mut sink = bucket.open_upload_stream(filename, opts).await.expect("open");
        sink.write(Bytes::from_static(b"x")).await.expect("write");
        sink.finish().await.expect("finish");
    }

    #[tokio::test]
    async fn test_first_version_is_one() {
        let bucket = MemoryBucket::new("fs", 8);
        let v = VersionResolver::default().next_version(&bucket, "new.txt").await.expect("resolve");
        assert_eq!(v, Version::FIRST);
    }

    #[tokio::test]
    async fn test_increments_max_observed() {
        let bucket = MemoryBucket::new("fs", 8);
        put(&bucket, "a.txt", Version::new(1)).await;
        put(&bucket, "a.txt", Version::new(5)).await;
        put(&bucket, "a.txt", Version::new(3)).await;
        put(&bucket, "b.txt", Version::new(40)).await;

        let v = VersionResolver::default().next_version(&bucket, "a.txt").await.expect("resolve");
        assert_eq!(v, Version::new(6));
    }

    #[tokio::test]
    async fn test_unparsable_previous_counts_as_zero() {
        let bucket = MemoryBucket::new("fs", 8);
        put(&bucket, "a.txt", Version::new(0)).await;
        let v = VersionResolver::default().next_version(&bucket, "a.txt").await.expect("resolve");
        assert_eq!(v, Version::FIRST);
    }
}
