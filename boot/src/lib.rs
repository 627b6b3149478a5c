/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Boot artifact selection and generation.
//!
//! This crate is the single source of truth that the DHCP handlers, the
//! TFTP router, and the HTTP router all agree on: given what a client told
//! us on the wire, which next-server and bootfile does it get, which iPXE
//! binary does that name resolve to, and what boot script is handed to it
//! once iPXE (or U-Boot's PXE client) is running.

mod arch;
mod client;
mod embedded;
mod mac_format;
mod patch;
pub mod script;
mod selector;
mod trace;
mod uboot;
mod vendor_class;

pub use arch::{is_raspberry_pi, ClientArch};
pub use client::{ClientRequest, IPXE_USER_CLASS};
pub use embedded::Files;
pub use mac_format::MacFormat;
pub use patch::{patch, PATCH_MAGIC};
pub use selector::{Selection, Selector, SelectorConfig, NETBOOT_NOT_ALLOWED};
pub use trace::{extract_traceparent_from_filename, Traceparent};
pub use uboot::{parse_image, ImageBuilder, ImageHeader, ImageType, OperatingSystem, UbootArch};
pub use vendor_class::{ClientType, VendorClass, VendorClassParseError};

/// Errors produced while selecting or generating boot artifacts.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("patch of {got} bytes exceeds the {max} byte placeholder")]
    PatchTooLong { got: usize, max: usize },

    #[error("input payload is empty")]
    EmptyPayload,

    #[error("image too small: {0} bytes")]
    ImageTooSmall(usize),

    #[error("invalid image magic: {0:#010x}")]
    BadMagic(u32),

    #[error("{kind} crc mismatch: expected {expected:#010x}, got {got:#010x}")]
    CrcMismatch {
        kind: &'static str,
        expected: u32,
        got: u32,
    },

    #[error("image truncated: header declares {declared} payload bytes, {got} present")]
    Truncated { declared: usize, got: usize },
}
