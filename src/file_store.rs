// src/file_store.rs
//
// Prefix-scoped view over a bucket: filtered enumeration of the objects under
// a `gs://bucket/prefix` root, and exists/delete of members by absolute or
// relative name. The store never holds object content.

use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::{FsConfig, OpContext};
use crate::constants::PATH_SEPARATOR;
use crate::error::{FsError, Result};
use crate::file_handle::FileHandle;
use crate::object_store::{ClientFactory, StorageClient};
use crate::uri::{ObjectKey, has_store_scheme, resolve_uri};

/// A bucket + prefix scope.
pub struct FileStore {
    uri: String,
    factory: Arc<dyn ClientFactory>,
    config: FsConfig,
    /// Client created at construction time by [`FileStore::open`]; listings use
    /// their own transient client.
    client: Option<Box<dyn StorageClient>>,
}

impl FileStore {
    /// Store without a constructor-time client.
    pub fn new(uri: impl Into<String>, factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_config(uri, factory, FsConfig::default())
    }

    pub fn with_config(
        uri: impl Into<String>,
        factory: Arc<dyn ClientFactory>,
        config: FsConfig,
    ) -> Self {
        Self {
            uri: uri.into(),
            factory,
            config,
            client: None,
        }
    }

    /// Store with an eagerly created client. A connection failure is logged
    /// and leaves the store usable; every operation connects on its own.
    pub async fn open(
        uri: impl Into<String>,
        factory: Arc<dyn ClientFactory>,
        config: FsConfig,
    ) -> Self {
        let mut store = Self::with_config(uri, factory, config);
        let ctx = store.config.op_context();
        match store.factory.connect(&ctx).await {
            Ok(client) => store.client = Some(client),
            Err(e) => warn!("eager client for {} not created: {:#}", store.uri, e),
        }
        store
    }

    /// Fixed root of the store.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Absolute URI of `uri_or_relative` within this store.
    pub fn resolve(&self, uri_or_relative: &str) -> String {
        if has_store_scheme(uri_or_relative) {
            uri_or_relative.to_string()
        } else {
            resolve_uri(&self.uri, uri_or_relative)
        }
    }

    /// Handle for a member of the store, sharing this store's factory and config.
    pub fn file(&self, uri_or_relative: &str) -> FileHandle {
        FileHandle::with_config(
            self.resolve(uri_or_relative),
            Arc::clone(&self.factory),
            self.config.clone(),
        )
    }

    /// Call `visit` with the URI of every non-empty object under the store
    /// prefix whose full URI matches `filter` (a regex; empty matches all).
    ///
    /// Objects are visited in the backend's listing order. The whole
    /// enumeration is bounded by the configured listing timeout; when it
    /// fires the call returns [`FsError::Timeout`] and visits already made
    /// stand. Returns the number of visited objects.
    pub async fn apply<F>(&self, filter: &str, mut visit: F) -> Result<usize>
    where
        F: FnMut(&str),
    {
        let scope = ObjectKey::parse(&self.uri)?;
        let matcher = compile_filter(filter)?;

        let ctx = self.config.op_context();
        let client = ctx
            .run(async {
                self.factory
                    .connect(&ctx)
                    .await
                    .map_err(FsError::ClientInit)
            })
            .await?;

        let listing = self.config.listing_context();
        let result = listing
            .run(enumerate(
                &listing,
                client.as_ref(),
                &scope,
                matcher.as_ref(),
                self.config.list_page_size,
                &mut visit,
            ))
            .await;

        if let Err(e) = client.close().await {
            warn!("releasing listing client for {} failed: {}", self.uri, e);
        }
        match &result {
            Ok(n) => debug!("apply({}, {:?}) visited {} objects", self.uri, filter, n),
            Err(e) => debug!("apply({}, {:?}) failed: {}", self.uri, filter, e),
        }
        result
    }

    /// All matching objects as file handles, in listing order.
    pub async fn list(&self, filter: &str) -> Result<Vec<FileHandle>> {
        let mut files = Vec::new();
        self.apply(filter, |uri| files.push(self.file(uri))).await?;
        Ok(files)
    }

    /// Existence of a member; errors read as `false`.
    pub async fn exists(&self, uri_or_relative: &str) -> bool {
        let mut file = self.file(uri_or_relative);
        let found = file.exists().await;
        if let Err(e) = file.close().await {
            debug!("closing probe handle for {} failed: {}", file.uri(), e);
        }
        found
    }

    /// Delete a member.
    pub async fn delete(&self, uri_or_relative: &str) -> Result<()> {
        let mut file = self.file(uri_or_relative);
        let deleted = file.delete().await;
        let closed = file.close().await;
        deleted?;
        closed
    }

    /// Release the constructor-time client, if any. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("uri", &self.uri)
            .field("client", &self.client.is_some())
            .finish()
    }
}

/// Empty filter means no filtering.
fn compile_filter(filter: &str) -> Result<Option<Regex>> {
    if filter.is_empty() {
        return Ok(None);
    }
    Regex::new(filter)
        .map(Some)
        .map_err(|source| FsError::InvalidFilter {
            pattern: filter.to_string(),
            source,
        })
}

/// Listing prefix for a store key: the key as a directory, or the whole
/// bucket for a root store.
fn listing_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with(PATH_SEPARATOR) {
        key.to_string()
    } else {
        format!("{}{}", key, PATH_SEPARATOR)
    }
}

async fn enumerate<F>(
    ctx: &OpContext,
    client: &dyn StorageClient,
    scope: &ObjectKey,
    matcher: Option<&Regex>,
    page_size: usize,
    visit: &mut F,
) -> Result<usize>
where
    F: FnMut(&str),
{
    let prefix = listing_prefix(&scope.key);
    let mut page_token: Option<String> = None;
    let mut visited = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let page = client
            .list_page(&scope.bucket, &prefix, page_token.take(), page_size)
            .await?;

        for entry in page.entries {
            // Zero-size entries are directory placeholders.
            if entry.size == 0 {
                trace!("skipping placeholder {}", entry.name);
                continue;
            }
            let candidate = scope.sibling_uri(&entry.name);
            if matcher.is_none_or(|re| re.is_match(&candidate)) {
                visit(&candidate);
                visited += 1;
            }
        }

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    Ok(visited)
}
