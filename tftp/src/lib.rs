/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Read-only TFTP artifact router.
//!
//! A regex-indexed multiplexer over the boot artifact namespace: patched
//! embedded iPXE binaries, generated PXELinux configs, cached workload
//! kernel/initramfs files, and per-MAC Raspberry Pi firmware. Incoming
//! filenames are normalized (Pi serial/MAC prefix stripped, traceparent
//! suffix extracted) before dispatch; write requests are always rejected
//! with an access violation.

mod handlers;
mod mux;
mod normalize;
mod routes;
mod server;

pub use handlers::{
    BinaryHandler, EmbeddedFilesHandler, HookHandler, PiFirmwareHandler, PxelinuxHandler,
};
pub use mux::{ServeMux, TftpHandler};
pub use normalize::{normalize, TftpRequest};
pub use routes::{standard_mux, RouterConfig};
pub use server::{serve, TftpServerConfig};

use anvil_backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum TftpError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error(transparent)]
    Boot(#[from] anvil_boot::BootError),

    #[error(transparent)]
    Firmware(#[from] anvil_firmware::FirmwareError),

    #[error("tftp transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for TftpError {
    fn from(err: BackendError) -> Self {
        if err.is_not_found() {
            TftpError::NotFound(err.to_string())
        } else {
            TftpError::Backend(err)
        }
    }
}
