// src/lib.rs
//
// Crate root: file and file-store semantics over Google Cloud Storage objects.
//
// Usage:
//
//   let mut file = file_for_uri("gs://bucket/reports/2024.csv");
//   file.write_all(b"a,b,c\n").await?;
//   let data = file.read_all().await?;
//   file.rename("{{path}}/archive/{{file}}.{{ext}}").await?;
//   file.close().await?;
//
//   let mut store = file_store_for_uri("gs://bucket/reports").await;
//   for f in store.list(r"\.csv$").await? {
//       println!("{}", f.uri());
//   }
//   store.close().await?;

// ===== Core Public API =====
pub mod config;
pub mod constants;
pub mod error;
pub mod file_handle;
pub mod file_store;
pub mod object_store;
pub mod uri;

// ===== Backends =====
pub mod memory_store;

// Google Cloud Storage client - feature-gated
#[cfg(feature = "gcs")]
pub mod gcs_client;

pub use config::{FsConfig, OpContext};
pub use error::{FsError, Result};
pub use file_handle::{FileHandle, Presence};
pub use file_store::FileStore;
pub use memory_store::MemoryClientFactory;
pub use object_store::{
    ClientFactory, ListEntry, ListPage, ObjectAttributes, ObjectReader, ObjectWriter,
    StorageClient,
};
pub use uri::{ObjectKey, Scheme, infer_scheme, parse_gcs_uri, resolve_uri};

#[cfg(feature = "gcs")]
pub use gcs_client::{GcsClientFactory, resolve_gcs_endpoint};

/// File handle for a `gs://` URI, backed by a GCS factory configured from the
/// environment (emulator variables and `GCSFS_*` overrides).
#[cfg(feature = "gcs")]
pub fn file_for_uri(uri: &str) -> FileHandle {
    FileHandle::with_config(
        uri,
        std::sync::Arc::new(GcsClientFactory::from_env()),
        FsConfig::from_env(),
    )
}

/// File store for a `gs://bucket/prefix` URI with an eagerly created client.
#[cfg(feature = "gcs")]
pub async fn file_store_for_uri(uri: &str) -> FileStore {
    FileStore::open(
        uri,
        std::sync::Arc::new(GcsClientFactory::from_env()),
        FsConfig::from_env(),
    )
    .await
}
