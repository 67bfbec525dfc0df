// src/gcs_client.rs
//
// Google Cloud Storage backend using the gcloud-storage crate.
// Implements the client capability (readers, writers, attributes, delete,
// copy, paginated listing) with Application Default Credentials (ADC), or
// anonymous access against a local emulator.

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use gcloud_storage::client::{Client, ClientConfig};
use gcloud_storage::http::objects::copy::CopyObjectRequest;
use gcloud_storage::http::objects::delete::DeleteObjectRequest;
use gcloud_storage::http::objects::download::Range;
use gcloud_storage::http::objects::get::GetObjectRequest;
use gcloud_storage::http::objects::list::ListObjectsRequest;
use gcloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use gcloud_storage::http::objects::Object;
use gcloud_storage::http::Error as GcsHttpError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::config::OpContext;
use crate::constants::{DEFAULT_WRITE_CHANNEL_DEPTH, ENV_GCS_ENDPOINT_URL, ENV_STORAGE_EMULATOR_HOST};
use crate::error::{FsError, Result};
use crate::object_store::{
    ClientFactory, ListEntry, ListPage, ObjectAttributes, ObjectReader, ObjectWriter,
    StorageClient,
};
use crate::uri::ObjectKey;

/// Produces GCS clients.
///
/// Authentication follows the standard ADC chain:
/// 1. GOOGLE_APPLICATION_CREDENTIALS environment variable (service account JSON)
/// 2. GCE/GKE metadata server (automatic for Google Cloud workloads)
/// 3. gcloud CLI credentials (~/.config/gcloud/application_default_credentials.json)
///
/// Supports custom endpoints via environment variables for local emulators and proxies:
/// - `GCS_ENDPOINT_URL`: Full endpoint URL (e.g., http://localhost:4443)
/// - `STORAGE_EMULATOR_HOST`: GCS emulator convention (host:port, http:// prepended if missing)
///
/// When a custom endpoint is set, anonymous authentication is used (typical for emulators).
/// The authenticated transport is built once per factory; a failed attempt is
/// not remembered, so the next `connect` tries again.
#[derive(Default)]
pub struct GcsClientFactory {
    endpoint: Option<String>,
    transport: OnceCell<Client>,
}

impl GcsClientFactory {
    /// Endpoint taken from the environment at construction time.
    pub fn from_env() -> Self {
        Self::with_endpoint(resolve_gcs_endpoint())
    }

    /// Explicit endpoint; `None` means the public GCS endpoint with ADC.
    pub fn with_endpoint(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            transport: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn build_client(&self) -> anyhow::Result<Client> {
        let config = match &self.endpoint {
            Some(endpoint) => {
                info!("Using custom GCS endpoint: {}", endpoint);
                ClientConfig {
                    storage_endpoint: endpoint.clone(),
                    ..ClientConfig::default()
                }
                .anonymous()
            }
            None => {
                debug!("Initializing GCS client with Application Default Credentials");
                ClientConfig::default()
                    .with_auth()
                    .await
                    .map_err(|e| anyhow!("Failed to initialize GCS authentication: {}", e))?
            }
        };
        info!("GCS client initialized successfully");
        Ok(Client::new(config))
    }
}

#[async_trait]
impl ClientFactory for GcsClientFactory {
    async fn connect(&self, ctx: &OpContext) -> anyhow::Result<Box<dyn StorageClient>> {
        let build = self.transport.get_or_try_init(|| self.build_client());
        let client = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(anyhow!("GCS client creation cancelled")),
            res = build => res?,
        };
        Ok(Box::new(GcsStorageClient {
            client: client.clone(),
        }))
    }
}

/// One GCS session handed to a file handle or a listing.
pub struct GcsStorageClient {
    client: Client,
}

fn map_gcs_error(err: GcsHttpError, op: &str, bucket: &str, object: &str) -> FsError {
    match &err {
        GcsHttpError::Response(resp) if resp.code == 404 => {
            FsError::ObjectNotFound(format!("gs://{}/{}", bucket, object))
        }
        _ => FsError::Backend(anyhow!(
            "GCS {} failed for gs://{}/{}: {}",
            op,
            bucket,
            object,
            err
        )),
    }
}

fn attributes_from(bucket: &str, obj: Object) -> ObjectAttributes {
    ObjectAttributes {
        bucket: bucket.to_string(),
        key: obj.name,
        size: obj.size.max(0) as u64,
        etag: Some(obj.etag),
        updated: obj.updated.map(|dt| format!("{:?}", dt)),
    }
}

#[async_trait]
impl StorageClient for GcsStorageClient {
    async fn open_reader(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectReader>> {
        debug!("GCS OPEN READER: bucket={}, object={}", bucket, key);
        let stream = self
            .client
            .download_streamed_object(
                &GetObjectRequest {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| map_gcs_error(e, "GET", bucket, key))?;

        Ok(Box::new(GcsObjectReader {
            bucket: bucket.to_string(),
            key: key.to_string(),
            stream: stream.boxed(),
        }))
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectWriter>> {
        debug!("GCS OPEN WRITER: bucket={}, object={}", bucket, key);
        let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, std::io::Error>>(
            DEFAULT_WRITE_CHANNEL_DEPTH,
        );

        let client = self.client.clone();
        let request = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(key.to_string()));
        let (task_bucket, task_key) = (bucket.to_string(), key.to_string());
        let upload = tokio::spawn(async move {
            client
                .upload_streamed_object(&request, ReceiverStream::new(rx), &upload_type)
                .await
                .map(|_| ())
                .map_err(|e| map_gcs_error(e, "PUT", &task_bucket, &task_key))
        });

        Ok(Box::new(GcsObjectWriter::new(bucket, key, tx, upload)))
    }

    async fn attributes(&self, bucket: &str, key: &str) -> Result<ObjectAttributes> {
        debug!("GCS STAT: bucket={}, object={}", bucket, key);
        let obj = self
            .client
            .get_object(&GetObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| map_gcs_error(e, "STAT", bucket, key))?;
        Ok(attributes_from(bucket, obj))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("GCS DELETE: bucket={}, object={}", bucket, key);
        self.client
            .delete_object(&DeleteObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| map_gcs_error(e, "DELETE", bucket, key))
    }

    async fn copy(&self, src: &ObjectKey, dst: &ObjectKey) -> Result<()> {
        debug!("GCS COPY: {} -> {}", src, dst);
        self.client
            .copy_object(&CopyObjectRequest {
                source_bucket: src.bucket.clone(),
                source_object: src.key.clone(),
                destination_bucket: dst.bucket.clone(),
                destination_object: dst.key.clone(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| map_gcs_error(e, "COPY", &src.bucket, &src.key))
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<ListPage> {
        debug!(
            "GCS LIST page request: bucket={}, prefix={:?}, page_token={:?}",
            bucket,
            prefix,
            page_token.as_deref().map(token_preview)
        );
        let request = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            page_token,
            max_results: Some(page_size.min(i32::MAX as usize) as i32),
            ..Default::default()
        };
        let response = self
            .client
            .list_objects(&request)
            .await
            .map_err(|e| FsError::Backend(anyhow!("GCS LIST failed for bucket {}: {}", bucket, e)))?;

        let entries: Vec<ListEntry> = response
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|obj| ListEntry {
                size: obj.size.max(0) as u64,
                name: obj.name,
            })
            .collect();
        debug!("GCS LIST page received: {} objects", entries.len());

        Ok(ListPage {
            entries,
            next_page_token: response.next_page_token,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        debug!("GCS client released");
        Ok(())
    }
}

/// First characters of a page token, for logs.
fn token_preview(token: &str) -> String {
    format!("{}...", token.chars().take(20).collect::<String>())
}

/// Streaming download cursor.
struct GcsObjectReader {
    bucket: String,
    key: String,
    stream: BoxStream<'static, std::result::Result<Bytes, GcsHttpError>>,
}

#[async_trait]
impl ObjectReader for GcsObjectReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(map_gcs_error(e, "GET stream", &self.bucket, &self.key)),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the stream aborts the underlying HTTP body.
        Ok(())
    }
}

type ChunkSender = mpsc::Sender<std::result::Result<Bytes, std::io::Error>>;

/// Streaming upload cursor. Chunks travel through a bounded channel into an
/// upload task; the object is committed when the channel closes and the
/// upload request completes.
///
/// A clean close of the channel is what commits, so every path other than
/// `finalize` poisons the body first.
struct GcsObjectWriter {
    bucket: String,
    key: String,
    tx: Option<ChunkSender>,
    upload: Option<JoinHandle<Result<()>>>,
    bytes_written: u64,
}

impl GcsObjectWriter {
    fn new(bucket: &str, key: &str, tx: ChunkSender, upload: JoinHandle<Result<()>>) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            tx: Some(tx),
            upload: Some(upload),
            bytes_written: 0,
        }
    }

    /// Close the channel and wait for the upload request to finish.
    async fn join_upload(&mut self) -> Result<()> {
        drop(self.tx.take());
        let upload = self.upload.take().ok_or(FsError::CursorClosed("write"))?;
        match upload.await {
            Ok(res) => res,
            Err(e) => Err(FsError::Backend(anyhow!(
                "GCS PUT task failed for gs://{}/{}: {}",
                self.bucket,
                self.key,
                e
            ))),
        }
    }

    /// Stop the upload without committing. The task is aborted and the body
    /// is terminated with an error item, so the request never sees a clean
    /// end of stream even if the task is mid-poll on another worker.
    fn abort_upload(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
        if let Some(tx) = self.tx.take() {
            let poisoned = tx.try_send(Err(cancelled_body()));
            if let Err(TrySendError::Full(item)) = poisoned {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = tx.send(item).await;
                    });
                }
            }
        }
    }
}

fn cancelled_body() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Interrupted, "upload cancelled")
}

#[async_trait]
impl ObjectWriter for GcsObjectWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(FsError::CursorClosed("write"))?;
        if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
            // Upload task ended early; surface its error if it has one.
            self.join_upload().await?;
            return Err(FsError::Backend(anyhow!(
                "GCS PUT for gs://{}/{} finished before all data was sent",
                self.bucket,
                self.key
            )));
        }
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<()> {
        self.join_upload().await?;
        debug!(
            "GCS PUT success: gs://{}/{} ({} bytes)",
            self.bucket, self.key, self.bytes_written
        );
        Ok(())
    }

    async fn cancel(mut self: Box<Self>) -> Result<()> {
        self.abort_upload();
        debug!("GCS PUT cancelled: gs://{}/{}", self.bucket, self.key);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for GcsObjectWriter {
    fn drop(&mut self) {
        if self.upload.is_some() {
            debug!(
                "GCS PUT abandoned: gs://{}/{} ({} bytes discarded)",
                self.bucket, self.key, self.bytes_written
            );
            self.abort_upload();
        }
    }
}

// ============================================================================
// Helper Functions for Custom Endpoint URL Construction
// ============================================================================

/// Resolves the GCS storage endpoint based on environment variables.
///
/// Returns a custom endpoint URL if `GCS_ENDPOINT_URL` or `STORAGE_EMULATOR_HOST`
/// is set, otherwise returns `None` (indicating default GCS endpoint should be used).
pub fn resolve_gcs_endpoint() -> Option<String> {
    resolve_gcs_endpoint_from(|name| std::env::var(name).ok())
}

/// [`resolve_gcs_endpoint`] over an arbitrary variable lookup.
pub fn resolve_gcs_endpoint_from<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_GCS_ENDPOINT_URL)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            // GCS emulator convention: STORAGE_EMULATOR_HOST=host:port
            lookup(ENV_STORAGE_EMULATOR_HOST)
                .filter(|v| !v.is_empty())
                .map(|host| {
                    if host.starts_with("http://") || host.starts_with("https://") {
                        host
                    } else {
                        format!("http://{}", host)
                    }
                })
        })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |k| map.get(k).map(|v| v.to_string())
    }

    #[test]
    fn test_resolve_gcs_endpoint_default() {
        assert!(resolve_gcs_endpoint_from(lookup(&[])).is_none());
    }

    #[test]
    fn test_resolve_gcs_endpoint_with_primary_env_var() {
        let endpoint = resolve_gcs_endpoint_from(lookup(&[(
            ENV_GCS_ENDPOINT_URL,
            "http://localhost:4443",
        )]));
        assert_eq!(endpoint.as_deref(), Some("http://localhost:4443"));
    }

    #[test]
    fn test_resolve_gcs_endpoint_with_emulator_host_no_scheme() {
        let endpoint =
            resolve_gcs_endpoint_from(lookup(&[(ENV_STORAGE_EMULATOR_HOST, "localhost:4443")]));
        assert_eq!(endpoint.as_deref(), Some("http://localhost:4443"));
    }

    #[test]
    fn test_resolve_gcs_endpoint_with_https_scheme() {
        let endpoint = resolve_gcs_endpoint_from(lookup(&[(
            ENV_STORAGE_EMULATOR_HOST,
            "https://secure-emulator:4443",
        )]));
        assert_eq!(endpoint.as_deref(), Some("https://secure-emulator:4443"));
    }

    #[test]
    fn test_resolve_gcs_endpoint_primary_takes_precedence() {
        let endpoint = resolve_gcs_endpoint_from(lookup(&[
            (ENV_GCS_ENDPOINT_URL, "http://primary:4443"),
            (ENV_STORAGE_EMULATOR_HOST, "emulator:9999"),
        ]));
        assert_eq!(endpoint.as_deref(), Some("http://primary:4443"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let endpoint = resolve_gcs_endpoint_from(lookup(&[
            (ENV_GCS_ENDPOINT_URL, ""),
            (ENV_STORAGE_EMULATOR_HOST, "emulator:9999"),
        ]));
        assert_eq!(endpoint.as_deref(), Some("http://emulator:9999"));
    }

    #[test]
    fn test_token_preview_is_char_safe() {
        assert_eq!(token_preview("abc"), "abc...");
        let token = "é".repeat(30);
        assert_eq!(token_preview(&token), format!("{}...", "é".repeat(20)));
    }

    type Committed = Arc<Mutex<Option<Vec<u8>>>>;

    /// Upload task that records the body once the channel closes cleanly,
    /// the way a streamed GCS upload commits.
    fn recording_upload(
        mut rx: mpsc::Receiver<std::result::Result<Bytes, std::io::Error>>,
    ) -> (JoinHandle<Result<()>>, Committed) {
        let committed: Committed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&committed);
        let upload = tokio::spawn(async move {
            let mut body = Vec::new();
            while let Some(chunk) = rx.recv().await {
                body.extend_from_slice(&chunk?);
            }
            *sink.lock().unwrap() = Some(body);
            Ok::<(), FsError>(())
        });
        (upload, committed)
    }

    fn writer() -> (GcsObjectWriter, Committed) {
        let (tx, rx) = mpsc::channel(DEFAULT_WRITE_CHANNEL_DEPTH);
        let (upload, committed) = recording_upload(rx);
        (GcsObjectWriter::new("bkt", "obj", tx, upload), committed)
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_writer_finalize_commits() {
        let (mut w, committed) = writer();
        w.write_chunk(b"hello ").await.unwrap();
        w.write_chunk(b"world").await.unwrap();
        assert_eq!(w.bytes_written(), 11);
        Box::new(w).finalize().await.unwrap();
        assert_eq!(committed.lock().unwrap().as_deref(), Some(&b"hello world"[..]));
    }

    #[tokio::test]
    async fn test_dropped_writer_does_not_commit() {
        let (mut w, committed) = writer();
        w.write_chunk(b"partial").await.unwrap();
        drop(w);
        settle().await;
        assert!(committed.lock().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_writer_does_not_commit() {
        for _ in 0..50 {
            let (mut w, committed) = writer();
            w.write_chunk(b"partial").await.unwrap();
            Box::new(w).cancel().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert!(committed.lock().unwrap().is_none());
        }
    }

    #[test]
    fn test_factory_keeps_explicit_endpoint() {
        let factory = GcsClientFactory::with_endpoint(Some("http://127.0.0.1:9023".into()));
        assert_eq!(factory.endpoint(), Some("http://127.0.0.1:9023"));
    }
}
