/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::FirmwareError;

use super::devpath::DevicePath;
use super::ucs16::Ucs16String;

pub const LOAD_OPTION_ACTIVE: u32 = 0x0000_0001;

/// An EFI_LOAD_OPTION: attributes, UCS-16 title, device path, optional
/// vendor data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub attr: u32,
    pub title: Ucs16String,
    pub device_path: DevicePath,
    pub opt_data: Vec<u8>,
}

impl BootEntry {
    pub fn parse(data: &[u8]) -> Result<Self, FirmwareError> {
        if data.len() < 8 {
            return Err(FirmwareError::TruncatedRecord(0));
        }
        let attr = u32::from_le_bytes(data[0..4].try_into().expect("4 bytes"));
        let path_size = u16::from_le_bytes(data[4..6].try_into().expect("2 bytes")) as usize;

        let title = Ucs16String::parse_at(data, 6);
        let path_offset = 6 + title.size();
        if path_offset + path_size > data.len() {
            return Err(FirmwareError::TruncatedRecord(path_offset));
        }

        let device_path = DevicePath::parse(&data[path_offset..path_offset + path_size]);
        let opt_data = data[path_offset + path_size..].to_vec();

        Ok(Self {
            attr,
            title,
            device_path,
            opt_data,
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let path = self.device_path.bytes();
        let mut out = Vec::new();
        out.extend_from_slice(&self.attr.to_le_bytes());
        out.extend_from_slice(&(path.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.title.bytes());
        out.extend_from_slice(&path);
        out.extend_from_slice(&self.opt_data);
        out
    }
}
