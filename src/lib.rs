// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod adapter;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod version;

pub use adapter::{FsAdapter, SaveMeta, ServiceSchema};
pub use error::{Result, StoreError};
pub use model::{BlobId, FileFilter, FileRecord, UploadReceipt, Version};
pub use pipeline::{DownloadStream, Payload};
