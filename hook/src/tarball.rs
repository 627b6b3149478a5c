/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Release-archive acquisition: one `hook_<suffix>.tar.gz` per
//! architecture, streamed through a gzip decoder to disk and untarred.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_compression::tokio::write::GzipDecoder;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::extract::extract_tar;
use crate::{HookError, ARCHITECTURES};

/// Download and extract the archives for every supported architecture.
/// Returns the base filenames of everything materialized.
pub(crate) async fn fetch_all(
    base_url: &str,
    cache_dir: &Path,
    timeout: Duration,
) -> Result<Vec<String>, HookError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let mut extracted = Vec::new();
    for (arch, suffix) in ARCHITECTURES {
        let url = format!("{}/hook_{}.tar.gz", base_url.trim_end_matches('/'), suffix);
        tracing::info!(arch, %url, "downloading workload archive");
        let files = fetch_one(&client, &url, cache_dir).await?;
        tracing::info!(arch, files = files.len(), "archive extracted");
        extracted.extend(files);
    }
    Ok(extracted)
}

async fn fetch_one(
    client: &reqwest::Client,
    url: &str,
    cache_dir: &Path,
) -> Result<Vec<String>, HookError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(HookError::DownloadStatus(response.status().as_u16()));
    }

    // The archive library wants a reader, so the decompressed tar goes to
    // a scratch file first and is unpacked from there.
    let tar_path = scratch_path(cache_dir);
    let result = download_then_extract(response, &tar_path, cache_dir).await;
    let _ = tokio::fs::remove_file(&tar_path).await;
    result
}

async fn download_then_extract(
    response: reqwest::Response,
    tar_path: &Path,
    cache_dir: &Path,
) -> Result<Vec<String>, HookError> {
    let tar_file = tokio::fs::File::create(tar_path).await?;
    let mut decoder = GzipDecoder::new(tar_file);

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        decoder.write_all(&chunk?).await?;
    }
    decoder.shutdown().await?;

    extract_tar(tar_path, cache_dir).await
}

fn scratch_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(format!(".download-{}.tar", std::process::id()))
}
