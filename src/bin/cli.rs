// src/bin/cli.rs
//
//! Small file-style CLI over Google Cloud Storage.
//!
//! Examples:
//! ```bash
//! gcsfs ls      gs://bucket/prefix                 # every non-empty object under prefix/
//! gcsfs ls      gs://bucket/prefix -f '\.csv$'     # regex over the full URI
//! gcsfs stat    gs://bucket/prefix/key.csv
//! gcsfs cat     gs://bucket/prefix/key.csv
//! gcsfs put     ./local.csv gs://bucket/prefix/key.csv
//! gcsfs get     gs://bucket/prefix/key.csv ./local.csv
//! gcsfs mv      gs://bucket/prefix/key.csv '{{path}}/done/{{file}}.{{ext}}'
//! gcsfs rm      gs://bucket/prefix/key.csv
//! gcsfs exists  gs://bucket/prefix/key.csv
//! ```
//!
//! Set `STORAGE_EMULATOR_HOST=localhost:4443` to run against a local emulator.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gcs_filestore::{FileHandle, FileStore, FsConfig, GcsClientFactory};

/// Macro to safely print with broken pipe handling
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // Gracefully exit on broken pipe (e.g., when piped to head/tail)
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

// -- Commands

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Listing deadline in seconds (default 120).
    #[arg(long = "list-timeout", value_name = "SECS")]
    list_timeout: Option<u64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List non-empty objects under a prefix.
    Ls {
        /// Store URI (e.g. gs://bucket/prefix)
        uri: String,

        /// Regex matched against each full object URI.
        #[arg(short, long, default_value = "")]
        filter: String,
    },
    /// Show size and etag of one object.
    Stat { uri: String },
    /// Write an object's content to stdout.
    Cat { uri: String },
    /// Upload a local file to an object.
    Put { local: PathBuf, uri: String },
    /// Download an object to a local file.
    Get { uri: String, local: PathBuf },
    /// Rename an object (copy then delete). Pattern may use {{path}}, {{file}}, {{ext}}.
    Mv { uri: String, pattern: String },
    /// Delete one object.
    Rm { uri: String },
    /// Exit 0 if the object exists, 1 otherwise.
    Exists { uri: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = FsConfig::from_env();
    if let Some(secs) = cli.list_timeout {
        config = config.with_list_timeout(std::time::Duration::from_secs(secs));
    }
    let factory = Arc::new(GcsClientFactory::from_env());
    if let Some(endpoint) = factory.endpoint() {
        info!("Using GCS endpoint {}", endpoint);
    }
    let file = |uri: &str| FileHandle::with_config(uri, factory.clone(), config.clone());

    match cli.cmd {
        Command::Ls { uri, filter } => {
            let mut store = FileStore::open(&uri, factory.clone(), config.clone()).await;
            let mut out = io::stdout().lock();
            let visited = store
                .apply(&filter, |found| {
                    if let Err(e) = writeln!(out, "{}", found) {
                        if e.kind() == ErrorKind::BrokenPipe {
                            std::process::exit(0);
                        }
                    }
                })
                .await;
            drop(out);
            store.close().await?;
            let n = visited.with_context(|| format!("listing {} failed", uri))?;
            info!("{} objects", n);
        }

        Command::Stat { uri } => {
            let mut f = file(&uri);
            let attrs = f.attributes().await;
            f.close().await?;
            let attrs = attrs?;
            safe_println!("{}", uri);
            safe_println!("  size: {}", attrs.size);
            if let Some(etag) = attrs.etag {
                safe_println!("  etag: {}", etag);
            }
            if let Some(updated) = attrs.updated {
                safe_println!("  updated: {}", updated);
            }
        }

        Command::Cat { uri } => {
            let mut f = file(&uri);
            let copied = f.copy_to(tokio::io::stdout()).await;
            f.close().await?;
            copied?;
        }

        Command::Put { local, uri } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            let mut f = file(&uri);
            let written = f.write_all(&data).await;
            f.close().await?;
            written?;
            safe_println!("{} -> {} ({} bytes)", local.display(), uri, data.len());
        }

        Command::Get { uri, local } => {
            let sink = tokio::fs::File::create(&local)
                .await
                .with_context(|| format!("creating {}", local.display()))?;
            let mut f = file(&uri);
            let copied = f.copy_to(sink).await;
            f.close().await?;
            let copied = copied?;
            safe_println!("{} -> {} ({} bytes)", uri, local.display(), copied);
        }

        Command::Mv { uri, pattern } => {
            let mut f = file(&uri);
            let renamed = f.rename(&pattern).await;
            f.close().await?;
            safe_println!("{} -> {}", uri, renamed?);
        }

        Command::Rm { uri } => {
            let mut f = file(&uri);
            let deleted = f.delete().await;
            f.close().await?;
            deleted?;
            safe_println!("deleted {}", uri);
        }

        Command::Exists { uri } => {
            let mut f = file(&uri);
            let found = f.exists().await;
            f.close().await?;
            safe_println!("{}", found);
            if !found {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
