// src/uri.rs
//
// URI parsing and resolution for gs:// (and gcs://) object URIs, plus the
// path/file/extension split used by rename patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::constants::{
    PATH_SEPARATOR, PLACEHOLDER_EXT, PLACEHOLDER_FILE, PLACEHOLDER_PATH, SCHEME_GCS,
    SCHEME_GCS_ALT,
};
use crate::error::{FsError, Result};

/// Any `{{...}}` token left over after placeholder substitution.
static UNKNOWN_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^}]*\}\}").expect("static regex"));

/// The two spellings of the Google Cloud Storage scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Gs,
    Gcs,
}

impl Scheme {
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::Gs => SCHEME_GCS,
            Scheme::Gcs => SCHEME_GCS_ALT,
        }
    }
}

/// Best-effort scheme inference from a URI.
pub fn infer_scheme(uri: &str) -> Option<Scheme> {
    if uri.starts_with(SCHEME_GCS) {
        Some(Scheme::Gs)
    } else if uri.starts_with(SCHEME_GCS_ALT) {
        Some(Scheme::Gcs)
    } else {
        None
    }
}

/// True when `uri` already carries a store scheme and needs no resolution.
pub fn has_store_scheme(uri: &str) -> bool {
    infer_scheme(uri).is_some()
}

/// Bucket + object path, derived from a store URI.
///
/// The key never starts with `/`. It may be empty, in which case the URI
/// names a bucket root (or a prefix scope) rather than an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub scheme: Scheme,
    pub bucket: String,
    pub key: String,
}

impl ObjectKey {
    pub fn new(scheme: Scheme, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            scheme,
            bucket: bucket.into(),
            key: key.trim_start_matches(PATH_SEPARATOR).to_string(),
        }
    }

    /// Parse `gs://bucket/key...` (or `gcs://`).
    pub fn parse(uri: &str) -> Result<Self> {
        let scheme = infer_scheme(uri).ok_or_else(|| {
            FsError::malformed_uri(uri, "expected gs:// or gcs:// prefix")
        })?;
        let rest = &uri[scheme.prefix().len()..];

        if let Some(bad) = rest.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(FsError::malformed_uri(
                uri,
                format!("illegal character {:?}", bad),
            ));
        }

        let mut parts = rest.splitn(2, PATH_SEPARATOR);
        let bucket = parts.next().unwrap_or("");
        if bucket.is_empty() {
            return Err(FsError::malformed_uri(uri, "empty bucket name"));
        }
        if bucket.contains(['?', '#', '@']) {
            return Err(FsError::malformed_uri(uri, "bucket name is not a valid host"));
        }

        let key = parts.next().unwrap_or("");
        Ok(Self::new(scheme, bucket, key))
    }

    /// Parse and additionally require a non-empty object key.
    pub fn parse_object(uri: &str) -> Result<Self> {
        let parsed = Self::parse(uri)?;
        parsed.require_object(uri)?;
        Ok(parsed)
    }

    pub fn require_object(&self, uri: &str) -> Result<()> {
        if self.key.is_empty() {
            return Err(FsError::InvalidObjectKey(uri.to_string()));
        }
        Ok(())
    }

    pub fn to_uri(&self) -> String {
        format!("{}{}/{}", self.scheme.prefix(), self.bucket, self.key)
    }

    /// URI of another object in the same bucket, keeping this scheme.
    pub fn sibling_uri(&self, object_name: &str) -> String {
        format!("{}{}/{}", self.scheme.prefix(), self.bucket, object_name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

/// Split a store URI into (bucket, object key).
///
/// ```
/// use gcs_filestore::uri::parse_gcs_uri;
///
/// let (bucket, object) = parse_gcs_uri("gs://my-bucket/path/to/file.txt").unwrap();
/// assert_eq!(bucket, "my-bucket");
/// assert_eq!(object, "path/to/file.txt");
///
/// // Bucket-only URIs are also supported (for prefix listings)
/// let (bucket, object) = parse_gcs_uri("gs://my-bucket/").unwrap();
/// assert_eq!(bucket, "my-bucket");
/// assert_eq!(object, "");
/// ```
pub fn parse_gcs_uri(uri: &str) -> Result<(String, String)> {
    let parsed = ObjectKey::parse(uri)?;
    Ok((parsed.bucket, parsed.key))
}

/// Resolve `maybe_relative` against `base`.
///
/// A URI that already has a store scheme is returned unchanged. Anything else
/// is appended to `base` with exactly one separator at the join.
pub fn resolve_uri(base: &str, maybe_relative: &str) -> String {
    if has_store_scheme(maybe_relative) {
        return maybe_relative.to_string();
    }
    let base = base.trim_end_matches(PATH_SEPARATOR);
    let rel = maybe_relative.trim_start_matches(PATH_SEPARATOR);
    if rel.is_empty() {
        return base.to_string();
    }
    format!("{}{}{}", base, PATH_SEPARATOR, rel)
}

/// Directory / stem / extension of an object URI, as substituted into
/// rename patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts {
    /// Everything before the last separator, e.g. `gs://bucket/dir`
    pub path: String,
    /// File name without its extension
    pub file: String,
    /// Extension without the dot; empty when the name has none
    pub ext: String,
}

impl PathParts {
    pub fn from_key(key: &ObjectKey) -> Self {
        let (dir, name) = match key.key.rfind(PATH_SEPARATOR) {
            Some(idx) => (&key.key[..idx], &key.key[idx + 1..]),
            None => ("", key.key.as_str()),
        };

        let path = if dir.is_empty() {
            format!("{}{}", key.scheme.prefix(), key.bucket)
        } else {
            format!("{}{}/{}", key.scheme.prefix(), key.bucket, dir)
        };

        // A leading dot marks a hidden file, not an extension.
        let (file, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
            _ => (name, ""),
        };

        Self {
            path,
            file: file.to_string(),
            ext: ext.to_string(),
        }
    }

    /// Substitute `{{path}}`, `{{file}}` and `{{ext}}` into `pattern`.
    /// Unknown `{{...}}` tokens are rejected.
    pub fn expand(&self, pattern: &str) -> Result<String> {
        if pattern.trim().is_empty() {
            return Err(FsError::malformed_pattern(pattern, "pattern is empty"));
        }
        let expanded = pattern
            .replace(PLACEHOLDER_PATH, &self.path)
            .replace(PLACEHOLDER_FILE, &self.file)
            .replace(PLACEHOLDER_EXT, &self.ext);

        if let Some(m) = UNKNOWN_PLACEHOLDER.find(&expanded) {
            return Err(FsError::malformed_pattern(
                pattern,
                format!("unknown placeholder {}", m.as_str()),
            ));
        }
        Ok(expanded)
    }
}
