/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! OCI artifact acquisition: a registry pull of the workload image
//! contents into the cache directory.
//!
//! Speaks the distribution API directly with static credentials: fetch
//! the image manifest, then stream each titled layer blob into the cache.
//! Gzipped tar layers are unpacked, raw layers are written under their
//! title.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::extract::extract_tar;
use crate::HookError;

const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
}

/// Pull `registry/repository:reference` into `cache_dir`. Returns the
/// kernel/initramfs base filenames that were materialized.
pub(crate) async fn pull(
    reference: &str,
    username: Option<&str>,
    password: Option<&str>,
    cache_dir: &Path,
    timeout: Duration,
) -> Result<Vec<String>, HookError> {
    let (registry, repository, tag) = split_reference(reference)?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let auth = Auth {
        username,
        password,
        token: tokio::sync::Mutex::new(None),
    };

    let manifest_url = format!("https://{registry}/v2/{repository}/manifests/{tag}");
    let response = auth
        .get(&client, &manifest_url, Some(MANIFEST_ACCEPT))
        .await?;
    let manifest: Manifest = response.json().await.map_err(HookError::Download)?;

    if let Some(media_type) = &manifest.media_type {
        if media_type.contains("image.index") || media_type.contains("manifest.list") {
            return Err(HookError::Manifest(format!(
                "multi-arch index not supported, push a platform manifest: {media_type}"
            )));
        }
    }

    let mut extracted = Vec::new();
    for layer in &manifest.layers {
        let Some(title) = layer
            .annotations
            .as_ref()
            .and_then(|a| a.get(TITLE_ANNOTATION))
        else {
            tracing::debug!(digest = %layer.digest, "layer has no title annotation, skipping");
            continue;
        };
        let title = match Path::new(title).file_name().and_then(|n| n.to_str()) {
            Some(base) => base.to_string(),
            None => continue,
        };

        let blob_url = format!("https://{registry}/v2/{repository}/blobs/{}", layer.digest);
        tracing::info!(%title, digest = %layer.digest, "pulling layer");
        let response = auth.get(&client, &blob_url, None).await?;

        if layer.media_type.ends_with("+gzip") || title.ends_with(".tar.gz") {
            let tar_path = cache_dir.join(format!(".oci-{}.tar", std::process::id()));
            let result =
                stream_gzip_to_tar(response, &tar_path).await.map(|_| ());
            let files = match result {
                Ok(()) => extract_tar(&tar_path, cache_dir).await,
                Err(err) => Err(err),
            };
            let _ = tokio::fs::remove_file(&tar_path).await;
            extracted.extend(files?);
        } else {
            let target = cache_dir.join(&title);
            stream_to_file(response, &target).await?;
            if title.starts_with("initramfs-") || title.starts_with("vmlinuz-") {
                extracted.push(title);
            }
        }
    }

    Ok(extracted)
}

struct Auth<'a> {
    username: Option<&'a str>,
    password: Option<&'a str>,
    token: tokio::sync::Mutex<Option<String>>,
}

impl Auth<'_> {
    /// GET with static credentials, following one bearer-token challenge.
    async fn get(
        &self,
        client: &reqwest::Client,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response, HookError> {
        let response = self.request(client, url, accept).await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return ok_or_status(response);
        }

        let challenge = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(challenge) = challenge {
            if let Some(token_url) = token_endpoint(&challenge) {
                self.fetch_token(client, &token_url).await?;
                let retry = self.request(client, url, accept).await?;
                return ok_or_status(retry);
            }
        }
        ok_or_status(response)
    }

    async fn request(
        &self,
        client: &reqwest::Client,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response, HookError> {
        let mut req = client.get(url);
        if let Some(accept) = accept {
            req = req.header("accept", accept);
        }
        if let Some(token) = self.token.lock().await.as_deref() {
            req = req.bearer_auth(token);
        } else if let Some(user) = self.username {
            req = req.basic_auth(user, self.password);
        }
        Ok(req.send().await?)
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        token_url: &str,
    ) -> Result<(), HookError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            access_token: Option<String>,
        }

        let mut req = client.get(token_url);
        if let Some(user) = self.username {
            req = req.basic_auth(user, self.password);
        }
        let response = ok_or_status(req.send().await?)?;
        let body: TokenResponse = response.json().await?;
        *self.token.lock().await = body.token.or(body.access_token);
        Ok(())
    }
}

fn ok_or_status(response: reqwest::Response) -> Result<reqwest::Response, HookError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(HookError::DownloadStatus(response.status().as_u16()))
    }
}

/// Build the token URL out of a `Bearer realm="...",service="...",scope="..."`
/// challenge header.
fn token_endpoint(challenge: &str) -> Option<String> {
    let rest = challenge.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut params = Vec::new();
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"');
        if key == "realm" {
            realm = Some(value.to_string());
        } else {
            params.push(format!("{key}={value}"));
        }
    }
    let realm = realm?;
    if params.is_empty() {
        Some(realm)
    } else {
        Some(format!("{realm}?{}", params.join("&")))
    }
}

async fn stream_gzip_to_tar(
    response: reqwest::Response,
    tar_path: &Path,
) -> Result<(), HookError> {
    let file = tokio::fs::File::create(tar_path).await?;
    let mut decoder = async_compression::tokio::write::GzipDecoder::new(file);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        decoder.write_all(&chunk?).await?;
    }
    decoder.shutdown().await?;
    Ok(())
}

async fn stream_to_file(response: reqwest::Response, target: &Path) -> Result<(), HookError> {
    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

fn split_reference(reference: &str) -> Result<(String, String, String), HookError> {
    let invalid = || {
        HookError::InvalidSource(format!(
            "expected registry/repository:reference, got {reference:?}"
        ))
    };

    let (registry, rest) = reference.split_once('/').ok_or_else(invalid)?;
    let (repository, tag) = match rest.rsplit_once(':') {
        // A '/' after the colon means it was part of a port, not a tag.
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (rest, "latest"),
    };
    if registry.is_empty() || repository.is_empty() || tag.is_empty() {
        return Err(invalid());
    }
    Ok((
        registry.to_string(),
        repository.to_string(),
        tag.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_splitting() {
        let (reg, repo, tag) = split_reference("ghcr.io/acme/hookos:v1.2").unwrap();
        assert_eq!(reg, "ghcr.io");
        assert_eq!(repo, "acme/hookos");
        assert_eq!(tag, "v1.2");

        let (_, repo, tag) = split_reference("ghcr.io/acme/hookos").unwrap();
        assert_eq!(repo, "acme/hookos");
        assert_eq!(tag, "latest");

        assert!(split_reference("no-slash").is_err());
    }

    #[test]
    fn bearer_challenge_parsing() {
        let challenge =
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:acme/hookos:pull""#;
        assert_eq!(
            token_endpoint(challenge).unwrap(),
            "https://ghcr.io/token?service=ghcr.io&scope=repository:acme/hookos:pull"
        );
        assert!(token_endpoint("Basic realm=x").is_none());
    }
}
