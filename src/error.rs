// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Entity is not a stream")]
    NotAStream,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Blob store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("`{operation}` is not currently implemented")]
    Unimplemented { operation: &'static str },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid blob id '{0}'")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// HTTP-like status class, for hosts that surface errors over a wire.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::BadRequest(_) | StoreError::NotAStream | StoreError::InvalidId(_) => 400,
            StoreError::NotFound(_) => 404,
            StoreError::Cancelled => 499,
            StoreError::Unimplemented { .. } => 501,
            StoreError::StoreUnavailable(_) => 503,
            StoreError::Config(_) | StoreError::Io(_) | StoreError::Serialization(_) => 500,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::BadRequest(_) | StoreError::NotAStream => "E_BAD_REQUEST",
            StoreError::InvalidId(_) => "E_INVALID_ID",
            StoreError::NotFound(_) => "ERR_NOT_FOUND",
            StoreError::StoreUnavailable(_) => "E_STORE_UNAVAILABLE",
            StoreError::Unimplemented { .. } => "E_UNIMPLEMENTED",
            StoreError::Cancelled => "E_CANCELLED",
            StoreError::Config(_) => "E_CONFIG",
            StoreError::Io(_) => "E_IO",
            StoreError::Serialization(_) => "E_SERIALIZATION",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(StoreError::NotAStream.status_code(), 400);
        assert_eq!(StoreError::NotFound("a.txt".into()).status_code(), 404);
        assert_eq!(StoreError::NotFound("a.txt".into()).code(), "ERR_NOT_FOUND");
        assert_eq!(
            StoreError::Unimplemented { operation: "count" }.to_string(),
            "`count` is not currently implemented"
        );
    }
}
