// src/file_handle.rs
//
// One remote object presented as a file.
//
// A handle owns its own storage client (created lazily, released on close)
// and at most one read cursor and one write cursor. Each cursor moves
// Unopened -> Open -> Exhausted/Closed and never goes back; whole-object
// operations (read_all, write_all, copy_to) use their own short-lived
// cursors and leave the cached ones alone.

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::mem;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::{FsConfig, OpContext};
use crate::error::{FsError, Result};
use crate::object_store::{ClientFactory, ObjectAttributes, ObjectReader, ObjectWriter, StorageClient};
use crate::uri::{ObjectKey, PathParts, resolve_uri};

/// Read side of a handle.
enum ReadCursor {
    Unopened,
    Open {
        reader: Box<dyn ObjectReader>,
        /// Remainder of the last chunk not yet handed to the caller
        pending: Bytes,
    },
    Exhausted,
    Closed,
}

impl ReadCursor {
    fn state(&self) -> &'static str {
        match self {
            ReadCursor::Unopened => "unopened",
            ReadCursor::Open { .. } => "open",
            ReadCursor::Exhausted => "exhausted",
            ReadCursor::Closed => "closed",
        }
    }
}

/// Write side of a handle.
enum WriteCursor {
    Unopened,
    Open(Box<dyn ObjectWriter>),
    Closed,
}

impl WriteCursor {
    fn state(&self) -> &'static str {
        match self {
            WriteCursor::Unopened => "unopened",
            WriteCursor::Open(_) => "open",
            WriteCursor::Closed => "closed",
        }
    }
}

/// Outcome of a metadata probe. [`FileHandle::exists`] collapses this to a
/// bool, so "denied" and "network down" read as "absent" there; callers that
/// care about the difference use [`FileHandle::probe`].
#[derive(Debug)]
pub enum Presence {
    Found(ObjectAttributes),
    NotFound,
    Error(FsError),
}

/// A remote object with file-like verbs.
pub struct FileHandle {
    uri: String,
    factory: Arc<dyn ClientFactory>,
    config: FsConfig,
    client: Option<Box<dyn StorageClient>>,
    read: ReadCursor,
    write: WriteCursor,
}

impl FileHandle {
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
            read: ReadCursor::Unopened,
            write: WriteCursor::Unopened,
        }
    }

    /// Current identity; changes after a successful [`FileHandle::rename`].
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Bucket and key of the current identity.
    pub fn object_key(&self) -> Result<ObjectKey> {
        ObjectKey::parse_object(&self.uri)
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    // ------------------------------------------------------------------
    // client / cursor plumbing
    // ------------------------------------------------------------------

    /// Create the client on first use. A failed attempt leaves the slot empty
    /// so the next call tries again.
    async fn connect_if_needed<'a>(
        slot: &'a mut Option<Box<dyn StorageClient>>,
        factory: &dyn ClientFactory,
        ctx: &OpContext,
    ) -> Result<&'a dyn StorageClient> {
        if slot.is_none() {
            let client = ctx
                .run(async { factory.connect(ctx).await.map_err(FsError::ClientInit) })
                .await?;
            debug!("storage client created");
            *slot = Some(client);
        }
        slot.as_deref()
            .ok_or_else(|| FsError::ClientInit(anyhow!("storage client unavailable")))
    }

    async fn client(&mut self, ctx: &OpContext) -> Result<&dyn StorageClient> {
        Self::connect_if_needed(&mut self.client, self.factory.as_ref(), ctx).await
    }

    async fn open_fresh_reader(&mut self, ctx: &OpContext) -> Result<Box<dyn ObjectReader>> {
        let key = ObjectKey::parse_object(&self.uri)?;
        let client = self.client(ctx).await?;
        ctx.run(client.open_reader(&key.bucket, &key.key)).await
    }

    async fn open_fresh_writer(&mut self, ctx: &OpContext) -> Result<Box<dyn ObjectWriter>> {
        let key = ObjectKey::parse_object(&self.uri)?;
        let client = self.client(ctx).await?;
        ctx.run(client.open_writer(&key.bucket, &key.key)).await
    }

    /// Move the read cursor to `next`, closing the stream if one was open.
    async fn retire_reader(&mut self, next: ReadCursor) {
        if let ReadCursor::Open { reader, .. } = mem::replace(&mut self.read, next) {
            if let Err(e) = reader.close().await {
                debug!("closing read cursor for {} failed: {}", self.uri, e);
            }
        }
    }

    /// Commit an open write cursor. The cursor ends up closed either way.
    async fn finalize_writer(&mut self) -> Result<()> {
        match mem::replace(&mut self.write, WriteCursor::Closed) {
            WriteCursor::Open(writer) => {
                let written = writer.bytes_written();
                let ctx = self.config.op_context();
                ctx.run(writer.finalize()).await?;
                debug!("committed {} bytes to {}", written, self.uri);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // incremental I/O
    // ------------------------------------------------------------------

    /// Read the next bytes of the object into `buf`.
    ///
    /// The first call opens a read cursor that is reused by later calls.
    /// Returns `Ok(0)` at end of object, and keeps returning it afterwards.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let ctx = self.config.op_context();
        if let ReadCursor::Unopened = self.read {
            let reader = self.open_fresh_reader(&ctx).await?;
            self.read = ReadCursor::Open {
                reader,
                pending: Bytes::new(),
            };
        }

        let (reader, pending) = match &mut self.read {
            ReadCursor::Open { reader, pending } => (reader, pending),
            ReadCursor::Exhausted => return Ok(0),
            ReadCursor::Unopened | ReadCursor::Closed => return Err(FsError::CursorClosed("read")),
        };
        if buf.is_empty() {
            return Ok(0);
        }

        while pending.is_empty() {
            match ctx.run(reader.next_chunk()).await {
                Ok(Some(chunk)) => *pending = chunk,
                Ok(None) => {
                    self.retire_reader(ReadCursor::Exhausted).await;
                    return Ok(0);
                }
                Err(e) => {
                    self.retire_reader(ReadCursor::Closed).await;
                    return Err(e);
                }
            }
        }

        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending.split_to(n));
        Ok(n)
    }

    /// Append `buf` to the object through the cached write cursor.
    ///
    /// Nothing is durable until [`FileHandle::finish_write`] or
    /// [`FileHandle::close`] commits the cursor.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let ctx = self.config.op_context();
        if let WriteCursor::Unopened = self.write {
            let writer = self.open_fresh_writer(&ctx).await?;
            self.write = WriteCursor::Open(writer);
        }

        let writer = match &mut self.write {
            WriteCursor::Open(writer) => writer,
            WriteCursor::Unopened | WriteCursor::Closed => {
                return Err(FsError::CursorClosed("write"));
            }
        };
        if buf.is_empty() {
            return Ok(0);
        }

        if let Err(e) = ctx.run(writer.write_chunk(buf)).await {
            if let WriteCursor::Open(writer) = mem::replace(&mut self.write, WriteCursor::Closed) {
                if let Err(cancel_err) = writer.cancel().await {
                    debug!("cancelling write cursor for {} failed: {}", self.uri, cancel_err);
                }
            }
            return Err(e);
        }
        Ok(buf.len())
    }

    /// Commit everything written through [`FileHandle::write`] so far.
    /// The write cursor is closed afterwards.
    pub async fn finish_write(&mut self) -> Result<()> {
        self.finalize_writer().await
    }

    // ------------------------------------------------------------------
    // whole-object I/O
    // ------------------------------------------------------------------

    /// Read the entire object with an independent cursor.
    pub async fn read_all(&mut self) -> Result<Bytes> {
        let ctx = self.config.op_context();
        let mut reader = self.open_fresh_reader(&ctx).await?;
        let drained = drain(&ctx, reader.as_mut()).await;
        let closed = reader.close().await;
        let data = drained?;
        closed?;
        debug!("read {} bytes from {}", data.len(), self.uri);
        Ok(data)
    }

    /// Replace the object with `data`, committing before returning.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let ctx = self.config.op_context();
        let mut writer = self.open_fresh_writer(&ctx).await?;
        for chunk in data.chunks(self.config.chunk_size) {
            if let Err(e) = ctx.run(writer.write_chunk(chunk)).await {
                if let Err(cancel_err) = writer.cancel().await {
                    debug!("cancelling upload to {} failed: {}", self.uri, cancel_err);
                }
                return Err(e);
            }
        }
        ctx.run(writer.finalize()).await?;
        debug!("wrote {} bytes to {}", data.len(), self.uri);
        Ok(())
    }

    /// Stream the object into `sink`. Both the read cursor and the sink are
    /// shut down on every exit path.
    pub async fn copy_to<W>(&mut self, mut sink: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let copied = self.copy_into(&mut sink).await;
        let shutdown = sink.shutdown().await;
        let copied = copied?;
        shutdown?;
        Ok(copied)
    }

    async fn copy_into<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let ctx = self.config.op_context();
        let mut reader = self.open_fresh_reader(&ctx).await?;
        let pumped = pump(&ctx, reader.as_mut(), sink).await;
        let closed = reader.close().await;
        let copied = pumped?;
        closed?;
        Ok(copied)
    }

    // ------------------------------------------------------------------
    // metadata
    // ------------------------------------------------------------------

    /// Attributes of the object (size, etag, update time).
    pub async fn attributes(&mut self) -> Result<ObjectAttributes> {
        let ctx = self.config.op_context();
        let key = ObjectKey::parse_object(&self.uri)?;
        let client = self.client(&ctx).await?;
        ctx.run(client.attributes(&key.bucket, &key.key)).await
    }

    /// Three-way existence check.
    pub async fn probe(&mut self) -> Presence {
        match self.attributes().await {
            Ok(attrs) => Presence::Found(attrs),
            Err(e) if e.is_not_found() => Presence::NotFound,
            Err(e) => Presence::Error(e),
        }
    }

    /// True iff the attributes fetch succeeds. Every failure, including
    /// permission and transport errors, reads as `false`.
    pub async fn exists(&mut self) -> bool {
        match self.probe().await {
            Presence::Found(_) => true,
            Presence::NotFound => false,
            Presence::Error(e) => {
                debug!("exists({}) treating error as absent: {}", self.uri, e);
                false
            }
        }
    }

    pub async fn delete(&mut self) -> Result<()> {
        let ctx = self.config.op_context();
        let key = ObjectKey::parse_object(&self.uri)?;
        let client = self.client(&ctx).await?;
        ctx.run(client.delete(&key.bucket, &key.key)).await?;
        debug!("deleted {}", self.uri);
        Ok(())
    }

    // ------------------------------------------------------------------
    // rename
    // ------------------------------------------------------------------

    /// Move the object to the URI produced by `pattern`.
    ///
    /// `{{path}}`, `{{file}}` and `{{ext}}` are replaced by the directory URI,
    /// stem and extension of the current object; a pattern that does not
    /// expand to a full URI is taken relative to the current directory.
    ///
    /// The move is a copy followed by a delete of the source. If the copy
    /// fails only the original exists. If the delete fails both exist and
    /// [`FsError::RenameIncomplete`] is returned; the handle keeps its old
    /// identity in that case.
    ///
    /// An open write cursor is committed first so its data travels with the
    /// object; an open read cursor is closed.
    pub async fn rename(&mut self, pattern: &str) -> Result<String> {
        let source = ObjectKey::parse_object(&self.uri)?;
        let parts = PathParts::from_key(&source);
        let expanded = parts.expand(pattern)?;
        let target_uri = resolve_uri(&parts.path, &expanded);
        let target = ObjectKey::parse(&target_uri)
            .map_err(|e| FsError::malformed_pattern(pattern, e.to_string()))?;
        if target.key.is_empty() {
            return Err(FsError::malformed_pattern(pattern, "expands to a bucket root"));
        }
        if target.bucket == source.bucket && target.key == source.key {
            debug!("rename of {} onto itself is a no-op", self.uri);
            return Ok(self.uri.clone());
        }

        self.finalize_writer().await?;
        self.retire_reader(ReadCursor::Closed).await;

        let ctx = self.config.op_context();
        let client = self.client(&ctx).await?;

        // Phase 1: copy. On failure the source is untouched.
        ctx.run(client.copy(&source, &target)).await?;

        // Phase 2: delete the source. On failure both objects exist.
        if let Err(e) = ctx.run(client.delete(&source.bucket, &source.key)).await {
            warn!(
                "rename copied {} to {} but could not delete the source; duplicate left behind",
                source, target
            );
            return Err(FsError::RenameIncomplete {
                source_uri: source.to_uri(),
                destination_uri: target.to_uri(),
                cause: anyhow::Error::new(e),
            });
        }

        debug!("renamed {} -> {}", source, target);
        self.uri = target.to_uri();
        Ok(self.uri.clone())
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Commit an open write cursor, close an open read cursor and release
    /// the client. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        let committed = self.finalize_writer().await;
        self.retire_reader(ReadCursor::Closed).await;
        let released = match self.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        };
        committed?;
        released
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("uri", &self.uri)
            .field("client", &self.client.is_some())
            .field("read", &self.read.state())
            .field("write", &self.write.state())
            .finish()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let WriteCursor::Open(writer) = &self.write {
            warn!(
                "file handle for {} dropped with {} uncommitted bytes; they are discarded (call close() to commit)",
                self.uri,
                writer.bytes_written()
            );
        }
    }
}

/// Read a cursor to exhaustion.
async fn drain(ctx: &OpContext, reader: &mut dyn ObjectReader) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = ctx.run(reader.next_chunk()).await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Copy a cursor into an async sink, returning the byte count.
async fn pump<W>(ctx: &OpContext, reader: &mut dyn ObjectReader, sink: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut copied = 0u64;
    while let Some(chunk) = ctx.run(reader.next_chunk()).await? {
        sink.write_all(&chunk).await?;
        copied += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(copied)
}
