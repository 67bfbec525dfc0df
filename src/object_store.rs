// src/object_store.rs
//
// Capability interface between the file layer and a storage backend.
//
// The file layer never builds clients or handles credentials itself. It asks a
// `ClientFactory` for a ready `StorageClient` and issues bucket/key operations
// against it. Backends: gcs_client (Google Cloud Storage), memory_store (in-process).

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::OpContext;
use crate::error::Result;
use crate::uri::ObjectKey;

/// Attributes returned by a metadata fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub updated: Option<String>,
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Full object name within the bucket
    pub name: String,
    pub size: u64,
}

/// One page of a prefix enumeration.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

/// Produces ready-to-use clients. Authentication and endpoint selection
/// (including emulator redirection) happen here and nowhere else.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, ctx: &OpContext) -> anyhow::Result<Box<dyn StorageClient>>;
}

/// A connection/session to the storage backend.
///
/// Implementations report a missing object as `FsError::ObjectNotFound`;
/// every other failure is `FsError::Backend`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open a streaming read cursor on an existing object.
    async fn open_reader(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectReader>>;

    /// Open a write cursor. Nothing is visible until `finalize`.
    async fn open_writer(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectWriter>>;

    /// Metadata fetch (HEAD-like).
    async fn attributes(&self, bucket: &str, key: &str) -> Result<ObjectAttributes>;

    /// Delete a single object.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Server-side copy.
    async fn copy(&self, src: &ObjectKey, dst: &ObjectKey) -> Result<()>;

    /// Fetch one listing page under `prefix`, continuing from `page_token`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<ListPage>;

    /// Release the session. Called exactly once by the owner.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Streaming read side of one object.
#[async_trait]
pub trait ObjectReader: Send {
    /// Next chunk of the object, `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Release the stream.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Streaming write side of one object.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Buffer or send one chunk. Not durable until `finalize`.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Commit the object. Last finalize wins.
    async fn finalize(self: Box<Self>) -> Result<()>;

    /// Abandon the upload; the target object is left as it was.
    async fn cancel(self: Box<Self>) -> Result<()>;

    fn bytes_written(&self) -> u64;
}
