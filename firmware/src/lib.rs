/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Raspberry Pi 4 UEFI firmware handling.
//!
//! The Pi 4 EDK2 firmware keeps its boot configuration in an authenticated
//! variable store inside the firmware volume it boots from. To make a Pi
//! netboot unattended we serve each client a copy of the base volume with
//! two extra variables injected: a `Boot0099` PXE-over-IPv4 entry for the
//! client's MAC and `BootNext = 0x0099`.

pub mod efi;
mod embedded;
mod varstore;

pub use embedded::Files;
pub use varstore::VarStore;

use mac_address::MacAddress;

/// Filename the Pi firmware requests over TFTP.
pub const FIRMWARE_FILE_NAME: &str = "RPI_EFI.fd";

/// Boot entry slot used for the injected PXE entry.
pub const PXE_BOOT_INDEX: u16 = 0x0099;

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("firmware volume header not found")]
    VolumeNotFound,

    #[error("invalid firmware volume signature: {0:#010x}")]
    BadSignature(u32),

    #[error("unexpected firmware volume guid: {0}")]
    BadVolumeGuid(String),

    #[error("unknown variable store guid: {0}")]
    BadStoreGuid(String),

    #[error("unknown variable store format: {0:#04x}")]
    BadStoreFormat(u8),

    #[error("unknown variable store state: {0:#04x}")]
    BadStoreState(u8),

    #[error("variable store too small: need {need} bytes, have {have}")]
    StoreTooSmall { need: usize, have: usize },

    #[error("variable {0} already exists")]
    DuplicateVariable(String),

    #[error("truncated variable record at offset {0:#x}")]
    TruncatedRecord(usize),

    #[error("invalid guid: {0}")]
    InvalidGuid(String),
}

/// Produce a firmware volume for one client: the base volume plus a
/// `Boot0099` PXE entry for `mac` and `BootNext` pointing at it.
///
/// Fails when the base volume already carries either variable; callers
/// always start from the pristine base image.
pub fn build_for_mac(base: &[u8], mac: MacAddress) -> Result<Vec<u8>, FirmwareError> {
    let store = VarStore::parse(base)?;
    let mut vars = store.var_list()?;

    vars.add(efi::EfiVar::pxe_boot_option(PXE_BOOT_INDEX, mac))?;
    vars.add(efi::EfiVar::boot_next(PXE_BOOT_INDEX))?;

    store.serialize(&vars)
}
