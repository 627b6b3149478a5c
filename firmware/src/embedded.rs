/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Compile-time Raspberry Pi boot file table, packed by `build.rs` into a
//! single blob plus index. The overlay set alone is hundreds of files, so
//! one symbol for the content keeps the binary's symbol table sane.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static BUNDLE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/bundle.bin"));
static INDEX: &str = include_str!(concat!(env!("OUT_DIR"), "/bundle.idx"));

static TABLE: Lazy<HashMap<&'static str, &'static [u8]>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for line in INDEX.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(offset), Some(len)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(offset), Ok(len)) = (offset.parse::<usize>(), len.parse::<usize>()) else {
            continue;
        };
        if offset + len <= BUNDLE.len() {
            table.insert(name, &BUNDLE[offset..offset + len]);
        }
    }
    table
});

/// The embedded Pi boot file table, keyed by base filename.
pub struct Files;

impl Files {
    pub fn get(name: &str) -> Option<&'static [u8]> {
        let base = name.rsplit('/').next().unwrap_or(name);
        TABLE.get(base).copied()
    }

    pub fn contains(name: &str) -> bool {
        Self::get(name).is_some()
    }

    /// The base firmware volume, when baked into this build.
    pub fn base_firmware() -> Option<&'static [u8]> {
        Self::get(crate::FIRMWARE_FILE_NAME)
    }
}
