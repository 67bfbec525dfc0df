// src/memory_store.rs
//
// In-process storage backend implementing the same client capability as GCS.
// Objects live in a shared ordered map, so listings come back in the same
// lexicographic order GCS uses. Intended for tests and local development.
//
// Fault injection hooks (failing connects, deletes, copies, writes, commits,
// read streams, slow listings) let callers exercise the error paths of the
// file layer without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::config::OpContext;
use crate::error::{FsError, Result};
use crate::object_store::{
    ClientFactory, ListEntry, ListPage, ObjectAttributes, ObjectReader, ObjectWriter,
    StorageClient,
};
use crate::uri::ObjectKey;

/// Chunk size handed out by memory read cursors
const READ_CHUNK: usize = 64 * 1024;

type ObjectMap = BTreeMap<(String, String), StoredObject>;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: u64,
}

#[derive(Default)]
struct MemoryState {
    objects: Mutex<ObjectMap>,
    generation: AtomicUsize,
    live_clients: AtomicUsize,
    connects: AtomicUsize,
    list_calls: AtomicUsize,
    // fault injection
    failing_connects: AtomicUsize,
    fail_deletes: AtomicBool,
    fail_copies: AtomicBool,
    fail_writes: AtomicBool,
    fail_finalize: AtomicBool,
    fail_reads_after: Mutex<Option<usize>>,
    cancelled_writers: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
}

impl MemoryState {
    fn objects(&self) -> MutexGuard<'_, ObjectMap> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, bucket: &str, key: &str, data: Bytes) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.objects().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject { data, generation },
        );
    }
}

/// Factory for in-memory clients. Clones share the same object map.
#[derive(Clone, Default)]
pub struct MemoryClientFactory {
    state: Arc<MemoryState>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at a `gs://bucket/key` URI, bypassing any client.
    pub fn insert(&self, uri: &str, data: impl Into<Bytes>) -> Result<()> {
        let key = ObjectKey::parse_object(uri)?;
        self.state.commit(&key.bucket, &key.key, data.into());
        Ok(())
    }

    /// Current content of an object, if present.
    pub fn object(&self, uri: &str) -> Option<Bytes> {
        let key = ObjectKey::parse(uri).ok()?;
        self.state
            .objects()
            .get(&(key.bucket, key.key))
            .map(|o| o.data.clone())
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.object(uri).is_some()
    }

    pub fn object_count(&self) -> usize {
        self.state.objects().len()
    }

    /// Clients connected and not yet closed.
    pub fn live_clients(&self) -> usize {
        self.state.live_clients.load(Ordering::SeqCst)
    }

    /// Total successful connects since creation.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Listing pages served since creation.
    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, on: bool) {
        self.state.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_copies(&self, on: bool) {
        self.state.fail_copies.store(on, Ordering::SeqCst);
    }

    /// Make every `write_chunk` of every writer fail.
    pub fn set_fail_writes(&self, on: bool) {
        self.state.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Make every writer's commit fail; nothing becomes visible.
    pub fn set_fail_finalize(&self, on: bool) {
        self.state.fail_finalize.store(on, Ordering::SeqCst);
    }

    /// Read cursors opened from now on fail after serving `chunks` chunks.
    /// `None` restores normal reads for new cursors.
    pub fn set_fail_reads_after(&self, chunks: Option<usize>) {
        *self.state.fail_reads_after.lock().unwrap_or_else(|e| e.into_inner()) = chunks;
    }

    /// Writers abandoned through `cancel` since creation.
    pub fn cancelled_writers(&self) -> usize {
        self.state.cancelled_writers.load(Ordering::SeqCst)
    }

    /// Delay every listing page by `delay`.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.state.list_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(&self, _ctx: &OpContext) -> anyhow::Result<Box<dyn StorageClient>> {
        let remaining = self.state.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.failing_connects.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("memory backend refused connection (injected failure)");
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.live_clients.fetch_add(1, Ordering::SeqCst);
        debug!("memory client connected");
        Ok(Box::new(MemoryStorageClient {
            state: Arc::clone(&self.state),
        }))
    }
}

/// One in-memory session.
pub struct MemoryStorageClient {
    state: Arc<MemoryState>,
}

impl MemoryStorageClient {
    fn not_found(bucket: &str, key: &str) -> FsError {
        FsError::ObjectNotFound(format!("gs://{}/{}", bucket, key))
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn open_reader(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectReader>> {
        let data = self
            .state
            .objects()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| Self::not_found(bucket, key))?;
        let fail_after = *self
            .state
            .fail_reads_after
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(Box::new(MemoryReader {
            bucket: bucket.to_string(),
            key: key.to_string(),
            data,
            fail_after,
            served: 0,
        }))
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
    }

    async fn attributes(&self, bucket: &str, key: &str) -> Result<ObjectAttributes> {
        let objects = self.state.objects();
        let obj = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(ObjectAttributes {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: obj.data.len() as u64,
            etag: Some(format!("{:x}", obj.generation)),
            updated: None,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        if self.state.fail_deletes.load(Ordering::SeqCst) {
            return Err(FsError::Backend(anyhow::anyhow!(
                "memory DELETE failed for gs://{}/{} (injected failure)",
                bucket,
                key
            )));
        }
        self.state
            .objects()
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn copy(&self, src: &ObjectKey, dst: &ObjectKey) -> Result<()> {
        if self.state.fail_copies.load(Ordering::SeqCst) {
            return Err(FsError::Backend(anyhow::anyhow!(
                "memory COPY failed for {} -> {} (injected failure)",
                src,
                dst
            )));
        }
        let data = self
            .state
            .objects()
            .get(&(src.bucket.clone(), src.key.clone()))
            .map(|o| o.data.clone())
            .ok_or_else(|| FsError::ObjectNotFound(src.to_uri()))?;
        self.state.commit(&dst.bucket, &dst.key, data);
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<ListPage> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.list_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // The page token is the last name served; resume strictly after it.
        let lower = match page_token {
            Some(last) => Bound::Excluded((bucket.to_string(), last)),
            None => Bound::Included((bucket.to_string(), prefix.to_string())),
        };
        let objects = self.state.objects();
        let mut entries: Vec<ListEntry> = objects
            .range((lower, Bound::Unbounded))
            .take_while(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .take(page_size.max(1) + 1)
            .map(|((_, k), o)| ListEntry {
                name: k.clone(),
                size: o.data.len() as u64,
            })
            .collect();

        let next_page_token = if entries.len() > page_size.max(1) {
            entries.truncate(page_size.max(1));
            entries.last().map(|e| e.name.clone())
        } else {
            None
        };
        Ok(ListPage {
            entries,
            next_page_token,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.live_clients.fetch_sub(1, Ordering::SeqCst);
        debug!("memory client closed");
        Ok(())
    }
}

/// Read cursor over a snapshot taken when the cursor was opened.
struct MemoryReader {
    bucket: String,
    key: String,
    data: Bytes,
    fail_after: Option<usize>,
    served: usize,
}

#[async_trait]
impl ObjectReader for MemoryReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.fail_after == Some(self.served) {
            return Err(FsError::Backend(anyhow::anyhow!(
                "memory GET stream broke for gs://{}/{} after {} chunks (injected failure)",
                self.bucket,
                self.key,
                self.served
            )));
        }
        if self.data.is_empty() {
            return Ok(None);
        }
        let n = self.data.len().min(READ_CHUNK);
        self.served += 1;
        Ok(Some(self.data.split_to(n)))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Write cursor; the object appears only on finalize.
struct MemoryWriter {
    state: Arc<MemoryState>,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(FsError::Backend(anyhow::anyhow!(
                "memory PUT chunk failed for gs://{}/{} (injected failure)",
                self.bucket,
                self.key
            )));
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<()> {
        let MemoryWriter {
            state,
            bucket,
            key,
            buffer,
        } = *self;
        if state.fail_finalize.load(Ordering::SeqCst) {
            return Err(FsError::Backend(anyhow::anyhow!(
                "memory PUT commit failed for gs://{}/{} (injected failure)",
                bucket,
                key
            )));
        }
        debug!("memory PUT: gs://{}/{} ({} bytes)", bucket, key, buffer.len());
        state.commit(&bucket, &key, Bytes::from(buffer));
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        self.state.cancelled_writers.fetch_add(1, Ordering::SeqCst);
        debug!("memory PUT cancelled: gs://{}/{}", self.bucket, self.key);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;

    async fn client(factory: &MemoryClientFactory) -> Box<dyn StorageClient> {
        factory.connect(&FsConfig::default().op_context()).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_pages_in_order() {
        let factory = MemoryClientFactory::new();
        for name in ["d/c", "d/a", "d/b", "e/x", "d0"] {
            factory.insert(&format!("gs://bkt/{name}"), "x").unwrap();
        }
        factory.insert("gs://other/d/z", "x").unwrap();

        let client = client(&factory).await;
        let first = client.list_page("bkt", "d/", None, 2).await.unwrap();
        let names: Vec<_> = first.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["d/a", "d/b"]);
        assert!(first.next_page_token.is_some());

        let second = client
            .list_page("bkt", "d/", first.next_page_token, 2)
            .await
            .unwrap();
        let names: Vec<_> = second.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["d/c"]);
        assert!(second.next_page_token.is_none());
        client.close().await.unwrap();
        assert_eq!(factory.live_clients(), 0);
    }

    #[tokio::test]
    async fn test_writer_invisible_until_finalize() {
        let factory = MemoryClientFactory::new();
        let client = client(&factory).await;
        let mut writer = client.open_writer("bkt", "obj").await.unwrap();
        writer.write_chunk(b"hello").await.unwrap();
        assert!(!factory.contains("gs://bkt/obj"));
        writer.finalize().await.unwrap();
        assert_eq!(factory.object("gs://bkt/obj").unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let factory = MemoryClientFactory::new();
        let client = client(&factory).await;
        assert!(client.open_reader("bkt", "nope").await.err().unwrap().is_not_found());
        assert!(client.attributes("bkt", "nope").await.unwrap_err().is_not_found());
        assert!(client.delete("bkt", "nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_connect_failure_is_not_sticky() {
        let factory = MemoryClientFactory::new();
        factory.fail_next_connects(1);
        let ctx = FsConfig::default().op_context();
        assert!(factory.connect(&ctx).await.is_err());
        assert!(factory.connect(&ctx).await.is_ok());
        assert_eq!(factory.connect_count(), 1);
    }
}
