// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::version::VersioningPolicy;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Blob store configuration.
    pub store: StoreConfig,
}

/// Connection and bucket parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Opaque connection string: `memory://` or `file:///path/to/root`.
    pub uri: String,
    /// Bucket every record of this adapter belongs to.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Chunk size used for new uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Fall back to version 1 when the version lookup fails.
    #[serde(default = "default_best_effort")]
    pub best_effort_versioning: bool,
}

impl StoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            chunk_size: self.chunk_size_bytes,
            versioning: if self.best_effort_versioning {
                VersioningPolicy::BestEffort
            } else {
                VersioningPolicy::Strict
            },
        }
    }
}

/// Options passed through to the bucket and the version resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub chunk_size: usize,
    pub versioning: VersioningPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { chunk_size: default_chunk_size(), versioning: VersioningPolicy::BestEffort }
    }
}

pub const DEFAULT_BUCKET: &str = "fs";

fn default_bucket() -> String { DEFAULT_BUCKET.to_string() }
fn default_chunk_size() -> usize { 255 * 1024 }
fn default_best_effort() -> bool { true }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.uri.trim().is_empty() {
            return Err(StoreError::Config("Missing `uri` definition".into()));
        }
        if self.store.bucket.trim().is_empty() {
            return Err(StoreError::Config("bucket must not be empty".into()));
        }
        if self.store.chunk_size_bytes == 0 {
            return Err(StoreError::Config("chunk_size_bytes must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_toml("[store]\nuri = \"memory://\"\n").expect("parse");
        assert_eq!(cfg.store.bucket, "fs");
        assert_eq!(cfg.store.chunk_size_bytes, 261_120);
        assert_eq!(cfg.store.options().versioning, VersioningPolicy::BestEffort);
    }

    #[test]
    fn test_strict_versioning() {
        let cfg = Config::from_toml(
            "[store]\nuri = \"file:///tmp/blobs\"\nbucket = \"docs\"\nbest_effort_versioning = false\n",
        )
        .expect("parse");
        assert_eq!(cfg.store.bucket, "docs");
        assert_eq!(cfg.store.options().versioning, VersioningPolicy::Strict);
    }

    #[test]
    fn test_rejects_empty_uri_and_zero_chunk() {
        assert!(Config::from_toml("[store]\nuri = \"\"\n").is_err());
        assert!(Config::from_toml("[store]\nuri = \"memory://\"\nchunk_size_bytes = 0\n").is_err());
    }
}
