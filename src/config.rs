// src/config.rs
//!
//! Runtime knobs for file handles and file stores, plus the explicit
//! operation context every backend call runs under.
//!
//! Builder helpers are provided so callers can write a fluent style:
//!
//! let cfg = FsConfig::default()
//!     .with_list_timeout(Duration::from_secs(30))
//!     .with_chunk_size(256 * 1024)
//!     .with_cancellation_token(token);
//!

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::constants::{
    DEFAULT_LIST_PAGE_SIZE, DEFAULT_LIST_TIMEOUT, DEFAULT_STREAM_BUFFER_SIZE, ENV_CHUNK_SIZE,
    ENV_LIST_PAGE_SIZE, ENV_LIST_TIMEOUT_SECS,
};
use crate::error::{FsError, Result};

/// Configuration shared by [`crate::FileHandle`] and [`crate::FileStore`].
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Deadline for one whole prefix enumeration (`apply` / `list`)
    pub list_timeout: Duration,
    /// Chunk size for whole-object writes and sink copies
    pub chunk_size: usize,
    /// Page size requested from the backend when listing
    pub list_page_size: usize,
    /// Cancels every in-flight backend call of every handle/store sharing it
    pub cancel: CancellationToken,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            list_timeout: DEFAULT_LIST_TIMEOUT,
            chunk_size: DEFAULT_STREAM_BUFFER_SIZE,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            cancel: CancellationToken::new(),
        }
    }
}

impl FsConfig {
    /// Defaults overridden by `GCSFS_*` environment variables.
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`FsConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_LIST_TIMEOUT_SECS) {
            cfg = cfg.with_list_timeout(Duration::from_secs(secs));
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, ENV_CHUNK_SIZE) {
            cfg = cfg.with_chunk_size(size);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, ENV_LIST_PAGE_SIZE) {
            cfg = cfg.with_list_page_size(size);
        }
        cfg
    }

    /// Builder-style helper: change the listing deadline.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Builder-style helper: change the transfer chunk size (min 1 byte).
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn with_list_page_size(mut self, size: usize) -> Self {
        self.list_page_size = size.max(1);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Context for a single call with no deadline.
    pub fn op_context(&self) -> OpContext {
        OpContext {
            cancel: self.cancel.clone(),
            deadline: None,
        }
    }

    /// Context for one enumeration, bounded by `list_timeout`.
    pub fn listing_context(&self) -> OpContext {
        OpContext {
            cancel: self.cancel.clone(),
            deadline: Some(self.list_timeout),
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

/// Explicit context threaded through backend calls: a cancellation token and
/// an optional time budget for the whole operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Duration>,
}

impl OpContext {
    /// Drive `fut` to completion unless the context is cancelled or the
    /// deadline passes first. The losing future is dropped.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let guarded = async {
            tokio::select! {
                _ = self.cancel.cancelled() => Err(FsError::Cancelled),
                res = fut => res,
            }
        };
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| FsError::Timeout(limit))?,
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = FsConfig::default();
        assert_eq!(cfg.list_timeout, Duration::from_secs(120));
        assert_eq!(cfg.chunk_size, 1024 * 1024);
        assert_eq!(cfg.list_page_size, 1000);
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            (ENV_LIST_TIMEOUT_SECS, "5"),
            (ENV_CHUNK_SIZE, "not-a-number"),
            (ENV_LIST_PAGE_SIZE, " 10 "),
        ]
        .into_iter()
        .collect();
        let cfg = FsConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.list_timeout, Duration::from_secs(5));
        assert_eq!(cfg.chunk_size, DEFAULT_STREAM_BUFFER_SIZE);
        assert_eq!(cfg.list_page_size, 10);
    }

    #[tokio::test]
    async fn test_context_deadline() {
        let ctx = OpContext {
            cancel: CancellationToken::new(),
            deadline: Some(Duration::from_millis(20)),
        };
        let res: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(FsError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_context_cancelled() {
        let cfg = FsConfig::default();
        cfg.cancel.cancel();
        let res = cfg.op_context().run(async { Ok(1) }).await;
        assert!(matches!(res, Err(FsError::Cancelled)));
    }
}
