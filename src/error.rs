// src/error.rs
//
// Typed error surface for file and file-store operations.

use anyhow::Error as AnyError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Every failure a file handle or file store can report.
///
/// Backend implementations work in `anyhow` internally and are mapped into
/// this enum at the `object_store` seam; only `ObjectNotFound` is recognized
/// specially, everything else lands in `Backend`.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("malformed URI {uri:?}: {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("URI {0:?} does not name an object (empty object key)")]
    InvalidObjectKey(String),

    #[error("failed to create storage client: {0:#}")]
    ClientInit(#[source] AnyError),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("malformed rename pattern {pattern:?}: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} cursor is closed")]
    CursorClosed(&'static str),

    /// Rename copied the object but could not delete the source.
    /// Both objects now exist; nothing was lost.
    #[error(
        "rename left a duplicate: copied {source_uri} to {destination_uri} but failed to delete the source: {cause:#}"
    )]
    RenameIncomplete {
        source_uri: String,
        destination_uri: String,
        cause: AnyError,
    },

    #[error(transparent)]
    Backend(#[from] AnyError),
}

impl FsError {
    pub fn malformed_uri(uri: &str, reason: impl Into<String>) -> Self {
        FsError::MalformedUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        FsError::MalformedPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::ObjectNotFound(_))
    }

    /// True for failures reported by the storage backend itself
    /// (transport, permission, quota), including a half-finished rename.
    pub fn is_backend(&self) -> bool {
        matches!(self, FsError::Backend(_) | FsError::RenameIncomplete { .. })
    }
}

// Mapping from string to error
impl From<String> for FsError {
    fn from(s: String) -> Self {
        FsError::Backend(AnyError::msg(s))
    }
}

impl From<&str> for FsError {
    fn from(s: &str) -> Self {
        FsError::Backend(AnyError::msg(s.to_string()))
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        FsError::Backend(AnyError::new(e))
    }
}
