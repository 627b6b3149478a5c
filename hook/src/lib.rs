/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Workload-environment (HookOS) kernel/initramfs cache.
//!
//! Makes `vmlinuz-<arch>` and `initramfs-<arch>` available under a local
//! directory for every supported architecture, downloaded lazily and at
//! most once per process lifetime. Serving paths never block on an
//! in-flight download: until the cache is ready every read misses.

mod extract;
mod oci;
mod tarball;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

pub use extract::canonical_symlinks;

/// Architectures the cache is populated for: canonical name and release
/// archive suffix.
pub const ARCHITECTURES: [(&str, &str); 2] = [
    ("x86_64", "latest-lts-x86_64"),
    ("aarch64", "latest-lts-aarch64"),
];

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("download failed: HTTP {0}")]
    DownloadStatus(u16),

    #[error("invalid artifact source: {0}")]
    InvalidSource(String),

    #[error("manifest error: {0}")]
    Manifest(String),
}

/// Where the kernel/initramfs archives come from. A deployment chooses one.
#[derive(Debug, Clone)]
pub enum Source {
    /// `GET <base_url>/hook_<arch-suffix>.tar.gz` per architecture.
    Tarball { base_url: String },
    /// Pull of `registry/repository:reference` via the OCI distribution
    /// API, with optional static credentials.
    Oci {
        reference: String,
        username: Option<String>,
        password: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub source: Source,
    pub download_timeout: Duration,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, source: Source) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
            download_timeout: Duration::from_secs(600),
        }
    }
}

/// The cache itself. Cheap to clone; all clones share the ready flag and
/// the download latch.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    /// Monotone: set once after a successful populate, never cleared.
    ready: AtomicBool,
    /// At-most-one download attempt per process, success or not.
    download_once: OnceCell<()>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ready: AtomicBool::new(false),
                download_once: OnceCell::new(),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.config.cache_dir
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Populate the cache. If the directory already holds any regular file
    /// at its top level the cache is declared ready and the download is
    /// skipped; otherwise the configured source is fetched, exactly once
    /// per process. A second call after the latch has fired is a no-op.
    ///
    /// On failure the error is logged, the ready flag stays false, and
    /// serves keep returning misses. Never returns an error to the caller:
    /// a dead artifact source must not take the rest of the stack down.
    pub async fn start(&self) {
        if self.is_ready() {
            return;
        }

        match self.has_local_files().await {
            Ok(true) => {
                tracing::info!(dir = %self.dir().display(), "cache already populated, skipping download");
                self.inner.ready.store(true, Ordering::Release);
                return;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(%err, "could not inspect cache directory");
            }
        }

        self.inner
            .download_once
            .get_or_init(|| async {
                match self.populate().await {
                    Ok(()) => {
                        self.inner.ready.store(true, Ordering::Release);
                        tracing::info!(dir = %self.dir().display(), "cache ready");
                    }
                    Err(err) => {
                        tracing::error!(%err, "cache download failed, serving misses until restart");
                    }
                }
            })
            .await;
    }

    /// Read a cached file by base filename. Path components are stripped;
    /// the cache never serves across directories. Misses until ready.
    pub async fn read(&self, filename: &str) -> Option<Vec<u8>> {
        if !self.is_ready() {
            return None;
        }
        let base = Path::new(filename).file_name()?;
        let path = self.inner.config.cache_dir.join(base);
        match tokio::fs::read(&path).await {
            Ok(data) => Some(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "cache read failed");
                None
            }
        }
    }

    async fn has_local_files(&self) -> Result<bool, std::io::Error> {
        let mut entries = match tokio::fs::read_dir(self.dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn populate(&self) -> Result<(), HookError> {
        tokio::fs::create_dir_all(self.dir()).await?;

        let extracted = match &self.inner.config.source {
            Source::Tarball { base_url } => {
                tarball::fetch_all(base_url, self.dir(), self.inner.config.download_timeout).await?
            }
            Source::Oci {
                reference,
                username,
                password,
            } => {
                oci::pull(
                    reference,
                    username.as_deref(),
                    password.as_deref(),
                    self.dir(),
                    self.inner.config.download_timeout,
                )
                .await?
            }
        };

        extract::canonical_symlinks(self.dir(), &extracted)?;
        Ok(())
    }
}
