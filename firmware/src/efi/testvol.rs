/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Synthetic firmware volumes for tests: a minimal but structurally valid
//! NVRAM volume with an authenticated variable store, optionally behind
//! padding or an FFS volume, with a recognizable trailer.

use super::{EfiVar, Guid};

/// Offset of the NVRAM volume inside [`volume_with_vars`] images.
pub const NV_OFFSET: usize = 1024;

/// FVH header length used by the synthetic volumes.
const HEADER_LEN: usize = 72;

/// Capacity of the variable area (store size minus the store header).
pub const STORE_CAPACITY: usize = 4096;

/// Bytes after the variable store that must survive rebuilds untouched.
pub const TRAILER_LEN: usize = 64;

/// A volume at [`NV_OFFSET`] holding `vars`, preceded by zero padding and
/// followed by a patterned trailer.
pub fn volume_with_vars(vars: &[EfiVar]) -> Vec<u8> {
    let mut image = vec![0u8; NV_OFFSET];
    append_nvram(&mut image, vars);
    image.extend(std::iter::repeat(0xab).take(TRAILER_LEN));
    image
}

/// A volume preceded by an FFS volume whose declared length must be
/// traversed to find the NVRAM region.
pub fn volume_behind_ffs(vars: &[EfiVar]) -> Vec<u8> {
    const FFS_LEN: usize = 2048;
    let mut image = vec![0u8; FFS_LEN];
    image[16..32].copy_from_slice(&Guid::FFS.bytes());
    image[32..40].copy_from_slice(&(FFS_LEN as u64).to_le_bytes());

    append_nvram(&mut image, vars);
    image.extend(std::iter::repeat(0xab).take(TRAILER_LEN));
    image
}

/// A volume whose store carries one deleted record before a live one.
pub fn volume_with_dead_record() -> Vec<u8> {
    let mut dead = EfiVar::boot_order(&[0x0007]).bytes();
    dead[2] = 0x3c; // cleared IN_DELETED_TRANSITION bits

    let live = EfiVar::boot_next(0x0001).bytes();

    let mut records = dead;
    records.extend_from_slice(&live);

    let mut image = vec![0u8; NV_OFFSET];
    append_nvram_raw(&mut image, &records);
    image.extend(std::iter::repeat(0xab).take(TRAILER_LEN));
    image
}

fn append_nvram(image: &mut Vec<u8>, vars: &[EfiVar]) {
    let mut records = Vec::new();
    for var in vars {
        records.extend_from_slice(&var.bytes());
    }
    append_nvram_raw(image, &records);
}

fn append_nvram_raw(image: &mut Vec<u8>, records: &[u8]) {
    let offset = image.len();
    let store_size = 28 + STORE_CAPACITY;
    let volume_len = HEADER_LEN + store_size;

    image.resize(offset + volume_len, 0);

    // FVH: zero vector, volume GUID, length, signature, attributes,
    // header length.
    image[offset + 16..offset + 32].copy_from_slice(&Guid::NV_DATA.bytes());
    image[offset + 32..offset + 40].copy_from_slice(&(volume_len as u64).to_le_bytes());
    image[offset + 40..offset + 44].copy_from_slice(&0x4856_465fu32.to_le_bytes());
    image[offset + 48..offset + 50].copy_from_slice(&(HEADER_LEN as u16).to_le_bytes());

    // Authenticated variable store header.
    let hstart = offset + HEADER_LEN;
    image[hstart..hstart + 16].copy_from_slice(&Guid::AUTH_VARS.bytes());
    image[hstart + 16..hstart + 20].copy_from_slice(&(store_size as u32).to_le_bytes());
    image[hstart + 20] = 0x5a;
    image[hstart + 21] = 0xfe;

    // Records, then 0xFF free space to the store end.
    let start = hstart + 28;
    let end = hstart + store_size;
    assert!(records.len() <= end - start, "test volume too small");
    image[start..start + records.len()].copy_from_slice(records);
    for b in &mut image[start + records.len()..end] {
        *b = 0xff;
    }
}
