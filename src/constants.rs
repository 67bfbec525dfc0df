// src/constants.rs
//
// Centralized constants for gcs-filestore to avoid hardcoded values throughout the codebase

use std::time::Duration;

// ============================================================================
// URI schemes
// ============================================================================

/// Canonical Google Cloud Storage scheme
pub const SCHEME_GCS: &str = "gs://";

/// Alternate spelling accepted on input (and preserved on output)
pub const SCHEME_GCS_ALT: &str = "gcs://";

/// Path separator inside object keys
pub const PATH_SEPARATOR: char = '/';

// ============================================================================
// Rename pattern placeholders
// ============================================================================

/// Directory portion of the current object URI (e.g. `gs://bucket/dir`)
pub const PLACEHOLDER_PATH: &str = "{{path}}";

/// File name without extension
pub const PLACEHOLDER_FILE: &str = "{{file}}";

/// Extension without the leading dot
pub const PLACEHOLDER_EXT: &str = "{{ext}}";

// ============================================================================
// Timeouts and sizing
// ============================================================================

/// Upper time budget for a single prefix enumeration (2 minutes)
pub const DEFAULT_LIST_TIMEOUT_SECS: u64 = 120;

/// Same budget as a Duration
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(DEFAULT_LIST_TIMEOUT_SECS);

/// Chunk size for whole-object writes and sink copies (1 MB)
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Objects requested per listing page. GCS caps a page at 1000.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// Depth of the channel between a write cursor and its upload task
pub const DEFAULT_WRITE_CHANNEL_DEPTH: usize = 4;

// ============================================================================
// Environment variables
// ============================================================================

/// Primary environment variable for custom GCS endpoint
/// Example: GCS_ENDPOINT_URL=http://localhost:4443
pub const ENV_GCS_ENDPOINT_URL: &str = "GCS_ENDPOINT_URL";

/// GCS emulator convention environment variable (STORAGE_EMULATOR_HOST=host:port)
/// When set without a scheme, `http://` is prepended.
/// Example: STORAGE_EMULATOR_HOST=localhost:4443
pub const ENV_STORAGE_EMULATOR_HOST: &str = "STORAGE_EMULATOR_HOST";

/// Override for the listing deadline, in seconds
pub const ENV_LIST_TIMEOUT_SECS: &str = "GCSFS_LIST_TIMEOUT_SECS";

/// Override for the transfer chunk size, in bytes
pub const ENV_CHUNK_SIZE: &str = "GCSFS_CHUNK_SIZE";

/// Override for the listing page size
pub const ENV_LIST_PAGE_SIZE: &str = "GCSFS_LIST_PAGE_SIZE";
