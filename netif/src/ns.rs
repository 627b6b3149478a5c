/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Network namespace plumbing.
//!
//! Namespace membership is a per-thread property, so every operation that
//! runs in the host namespace is executed on a dedicated OS thread: enter
//! the host namespace, run the closure on a single-threaded runtime,
//! restore the original namespace. The async scheduler never observes a
//! thread in the wrong namespace.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

use nix::sched::{setns, CloneFlags};

use crate::NetifError;

/// The host network namespace, reached through PID 1.
pub(crate) const HOST_NS_PATH: &str = "/proc/1/ns/net";
/// The calling process's own network namespace.
pub(crate) const SELF_NS_PATH: &str = "/proc/self/ns/net";

pub(crate) fn open_ns(path: impl AsRef<Path>) -> Result<File, NetifError> {
    let path = path.as_ref();
    File::open(path).map_err(|err| {
        NetifError::Namespace(format!("cannot open {}: {err}", path.display()))
    })
}

/// Run an async closure with the current thread switched into `target_ns`.
///
/// The closure runs to completion on a current-thread runtime on a
/// blocking worker; the original namespace is restored before the worker
/// is returned to the pool, even when the closure fails.
pub(crate) async fn in_namespace<T, F, Fut>(target_ns: File, f: F) -> Result<T, NetifError>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, NetifError>>,
{
    tokio::task::spawn_blocking(move || {
        let original = open_ns(SELF_NS_PATH)?;

        setns(target_ns.as_fd(), CloneFlags::CLONE_NEWNET)
            .map_err(|err| NetifError::Namespace(format!("setns into target failed: {err}")))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(NetifError::Io);
        let result = match runtime {
            Ok(rt) => rt.block_on(f()),
            Err(err) => Err(err),
        };

        // Restoring the original namespace must not be skipped: blocking
        // workers are reused by unrelated tasks.
        setns(original.as_fd(), CloneFlags::CLONE_NEWNET)
            .map_err(|err| NetifError::Namespace(format!("setns back failed: {err}")))?;

        result
    })
    .await
    .map_err(|_| NetifError::WorkerPanicked)?
}

/// True when the process already lives in the host network namespace.
pub(crate) fn in_host_namespace() -> Result<bool, NetifError> {
    let host = std::fs::metadata(HOST_NS_PATH)?;
    let own = std::fs::metadata(SELF_NS_PATH)?;
    use std::os::unix::fs::MetadataExt;
    Ok(host.ino() == own.ino() && host.dev() == own.dev())
}
