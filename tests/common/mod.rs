// tests/common/mod.rs
//
// Common test utilities: seeded in-memory backends and the live GCS test
// configuration.

#![allow(dead_code)]

use gcs_filestore::{FileHandle, FileStore, FsConfig, MemoryClientFactory};
use std::env;
use std::sync::Arc;

pub const BUCKET: &str = "test-bucket";

/// Test configuration for live GCS tests
pub struct TestConfig {
    /// The GCS bucket to use for testing
    pub bucket: String,
    /// The prefix for all test objects
    pub test_prefix: String,
}

/// Live configuration, or `None` when `GCS_TEST_BUCKET` is not set.
pub fn live_test_config() -> Option<TestConfig> {
    let bucket = env::var("GCS_TEST_BUCKET").ok().filter(|b| !b.is_empty())?;
    Some(TestConfig {
        bucket,
        test_prefix: format!("gcsfs-test-{}", std::process::id()),
    })
}

/// `gs://test-bucket/<key>`
pub fn uri(key: &str) -> String {
    format!("gs://{}/{}", BUCKET, key)
}

/// Memory backend pre-populated with `(key, content)` pairs in [`BUCKET`].
pub fn seeded(objects: &[(&str, &[u8])]) -> MemoryClientFactory {
    let factory = MemoryClientFactory::new();
    for (key, data) in objects {
        factory
            .insert(&uri(key), data.to_vec())
            .expect("seed object");
    }
    factory
}

pub fn file(factory: &MemoryClientFactory, key: &str) -> FileHandle {
    FileHandle::new(uri(key), Arc::new(factory.clone()))
}

pub fn store(factory: &MemoryClientFactory, prefix: &str, config: FsConfig) -> FileStore {
    FileStore::with_config(uri(prefix), Arc::new(factory.clone()), config)
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
