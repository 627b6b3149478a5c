/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Archive extraction and canonical symlink maintenance.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{HookError, ARCHITECTURES};

/// Extract a tar archive into `cache_dir`, materializing only entries
/// whose basenames begin with `initramfs-` or `vmlinuz-`. Returns the
/// extracted base filenames.
pub(crate) async fn extract_tar(
    tar_path: &Path,
    cache_dir: &Path,
) -> Result<Vec<String>, HookError> {
    let file = tokio::fs::File::open(tar_path).await?;
    let mut archive = tokio_tar::Archive::new(file);
    let mut entries = archive.entries()?;

    let mut extracted = Vec::new();
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let path = entry.path()?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        if !name.starts_with("initramfs-") && !name.starts_with("vmlinuz-") {
            continue;
        }

        let target = cache_dir.join(&name);
        tracing::debug!(filename = %name, target = %target.display(), "extracting");
        let mut out = tokio::fs::File::create(&target).await?;
        tokio::io::copy(&mut entry, &mut out).await?;
        out.flush().await?;
        extracted.push(name);
    }

    Ok(extracted)
}

/// Create or refresh the architecture-canonical symlinks
/// `initramfs-<arch>` and `vmlinuz-<arch>` pointing at the
/// correctly-suffixed extracted filenames. Existing links are removed
/// before recreation.
pub fn canonical_symlinks(cache_dir: &Path, extracted: &[String]) -> Result<(), HookError> {
    for name in extracted {
        let Some(prefix) = ["initramfs-", "vmlinuz-"]
            .iter()
            .find(|p| name.starts_with(**p))
        else {
            continue;
        };
        let Some(arch) = arch_for(name) else {
            tracing::warn!(filename = %name, "no architecture match, skipping symlink");
            continue;
        };

        let canonical = format!("{prefix}{arch}");
        if canonical == *name {
            continue;
        }
        let link = cache_dir.join(&canonical);

        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(name, &link)?;
        tracing::info!(link = %canonical, target = %name, "created canonical symlink");
    }
    Ok(())
}

fn arch_for(name: &str) -> Option<&'static str> {
    for (arch, suffix) in ARCHITECTURES {
        if name.contains(suffix) || name.contains(arch) {
            return Some(arch);
        }
    }
    // Alternate spellings seen in release archives.
    if name.contains("arm64") {
        return Some("aarch64");
    }
    if name.contains("amd64") {
        return Some("x86_64");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn build_tar(dir: &Path, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
        let tar_path = dir.join("fixture.tar");
        let file = tokio::fs::File::create(&tar_path).await.unwrap();
        let mut builder = tokio_tar::Builder::new(file);
        for (name, data) in entries {
            let mut header = tokio_tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).await.unwrap();
        }
        builder.finish().await.unwrap();
        tar_path
    }

    #[tokio::test]
    async fn only_kernel_and_initramfs_entries_are_materialized() {
        let dir = tempfile::tempdir().unwrap();
        let tar = build_tar(
            dir.path(),
            &[
                ("hook/vmlinuz-latest-lts-x86_64", b"kernel".as_slice()),
                ("hook/initramfs-latest-lts-x86_64", b"rootfs".as_slice()),
                ("hook/README.md", b"ignore me".as_slice()),
            ],
        )
        .await;

        let extracted = extract_tar(&tar, dir.path()).await.unwrap();
        assert_eq!(extracted.len(), 2);
        assert!(dir.path().join("vmlinuz-latest-lts-x86_64").is_file());
        assert!(!dir.path().join("README.md").exists());
    }

    #[tokio::test]
    async fn symlinks_point_at_suffixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let tar = build_tar(
            dir.path(),
            &[("vmlinuz-latest-lts-aarch64", b"kernel".as_slice())],
        )
        .await;

        let extracted = extract_tar(&tar, dir.path()).await.unwrap();
        canonical_symlinks(dir.path(), &extracted).unwrap();

        let link = dir.path().join("vmlinuz-aarch64");
        assert_eq!(
            std::fs::read_link(&link).unwrap().to_str().unwrap(),
            "vmlinuz-latest-lts-aarch64"
        );
        assert_eq!(std::fs::read(&link).unwrap(), b"kernel");
    }

    #[tokio::test]
    async fn existing_symlinks_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vmlinuz-old"), b"old").unwrap();
        std::os::unix::fs::symlink("vmlinuz-old", dir.path().join("vmlinuz-x86_64")).unwrap();

        let tar = build_tar(
            dir.path(),
            &[("vmlinuz-latest-lts-x86_64", b"new".as_slice())],
        )
        .await;
        let extracted = extract_tar(&tar, dir.path()).await.unwrap();
        canonical_symlinks(dir.path(), &extracted).unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("vmlinuz-x86_64")).unwrap(),
            b"new"
        );
    }

    #[test]
    fn arch_mapping_handles_alternate_spellings() {
        assert_eq!(arch_for("initramfs-armbian-arm64-edge"), Some("aarch64"));
        assert_eq!(arch_for("vmlinuz-generic-amd64"), Some("x86_64"));
        assert_eq!(arch_for("vmlinuz-riscv"), None);
    }
}
