/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Compile-time artifact table.
//!
//! `build.rs` packs everything under `embedded/` into one content blob and
//! a `name\toffset\tlen` index; lookups slice into the blob. One blob plus
//! one index keeps symbol bloat down compared to a static per file.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static BUNDLE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/bundle.bin"));
static INDEX: &str = include_str!(concat!(env!("OUT_DIR"), "/bundle.idx"));

static TABLE: Lazy<HashMap<&'static str, &'static [u8]>> = Lazy::new(|| parse_index(INDEX, BUNDLE));

fn parse_index(index: &'static str, bundle: &'static [u8]) -> HashMap<&'static str, &'static [u8]> {
    let mut table = HashMap::new();
    for line in index.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(offset), Some(len)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(offset), Ok(len)) = (offset.parse::<usize>(), len.parse::<usize>()) else {
            continue;
        };
        if offset + len <= bundle.len() {
            table.insert(name, &bundle[offset..offset + len]);
        }
    }
    table
}

/// The embedded filename → bytes table.
pub struct Files;

impl Files {
    /// Look up an embedded artifact by base filename. Path components in
    /// the request are stripped; the table never serves across directories.
    pub fn get(name: &str) -> Option<&'static [u8]> {
        let base = name.rsplit('/').next().unwrap_or(name);
        TABLE.get(base).copied()
    }

    pub fn contains(name: &str) -> bool {
        Self::get(name).is_some()
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        TABLE.keys().copied()
    }
}
