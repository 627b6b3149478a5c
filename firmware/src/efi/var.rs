/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use mac_address::MacAddress;

use super::bootentry::{BootEntry, LOAD_OPTION_ACTIVE};
use super::devpath::DevicePath;
use super::guid::Guid;
use super::ucs16::Ucs16String;

/// Variable attributes.
pub const EFI_VARIABLE_NON_VOLATILE: u32 = 0x0000_0001;
pub const EFI_VARIABLE_BOOTSERVICE_ACCESS: u32 = 0x0000_0002;
pub const EFI_VARIABLE_RUNTIME_ACCESS: u32 = 0x0000_0004;

/// Attributes for `Boot####`-family variables.
const BOOT_VAR_ATTR: u32 =
    EFI_VARIABLE_NON_VOLATILE | EFI_VARIABLE_BOOTSERVICE_ACCESS | EFI_VARIABLE_RUNTIME_ACCESS;

/// Record framing constants.
pub const VAR_MAGIC: u16 = 0x55aa;
pub const VAR_STATE_LIVE: u8 = 0x3f;

/// Size of the fixed record header preceding the GUID.
pub const VAR_HEADER_LEN: usize = 44;

/// One authenticated variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiVar {
    pub name: Ucs16String,
    pub guid: Guid,
    pub attr: u32,
    pub count: u64,
    /// Raw EFI_TIME bytes; all-zero for the variables we create.
    pub time: [u8; 16],
    pub pk_idx: u32,
    pub data: Vec<u8>,
}

impl EfiVar {
    pub fn new(name: &str, guid: Guid, attr: u32, data: Vec<u8>) -> Self {
        Self {
            name: Ucs16String::from_str(name),
            guid,
            attr,
            count: 0,
            time: [0u8; 16],
            pk_idx: 0,
            data,
        }
    }

    /// The `Boot####` PXE-over-IPv4 entry injected for one client NIC.
    pub fn pxe_boot_option(index: u16, mac: MacAddress) -> Self {
        let b = mac.bytes();
        let title = format!(
            "UEFI PXEv4 (MAC:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X})",
            b[0], b[1], b[2], b[3], b[4], b[5]
        );
        let entry = BootEntry {
            attr: LOAD_OPTION_ACTIVE,
            title: Ucs16String::from_str(&title),
            device_path: DevicePath::pxe_ipv4(mac),
            opt_data: Guid::BM_AUTO_CREATE_BOOT_OPTION.bytes().to_vec(),
        };
        Self::new(
            &format!("Boot{index:04X}"),
            Guid::GLOBAL_VARIABLE,
            BOOT_VAR_ATTR,
            entry.bytes(),
        )
    }

    pub fn boot_next(index: u16) -> Self {
        Self::new(
            "BootNext",
            Guid::GLOBAL_VARIABLE,
            BOOT_VAR_ATTR,
            index.to_le_bytes().to_vec(),
        )
    }

    pub fn boot_order(order: &[u16]) -> Self {
        let mut data = Vec::with_capacity(order.len() * 2);
        for idx in order {
            data.extend_from_slice(&idx.to_le_bytes());
        }
        Self::new("BootOrder", Guid::GLOBAL_VARIABLE, BOOT_VAR_ATTR, data)
    }

    /// Serialize one live record: fixed header, GUID, name, data, 0xFF
    /// padding to the 4-byte boundary.
    pub fn bytes(&self) -> Vec<u8> {
        let name = self.name.bytes();
        let mut out = Vec::with_capacity(VAR_HEADER_LEN + 16 + name.len() + self.data.len() + 3);

        out.extend_from_slice(&VAR_MAGIC.to_le_bytes());
        out.push(VAR_STATE_LIVE);
        out.push(0); // pad
        out.extend_from_slice(&self.attr.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.time);
        out.extend_from_slice(&self.pk_idx.to_le_bytes());
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.guid.bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&self.data);

        while out.len() % 4 != 0 {
            out.push(0xff);
        }
        out
    }

    pub fn boot_entry(&self) -> Result<BootEntry, crate::FirmwareError> {
        BootEntry::parse(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_4_byte_aligned() {
        let var = EfiVar::boot_next(0x0099);
        assert_eq!(var.bytes().len() % 4, 0);
    }

    #[test]
    fn pxe_boot_option_title_is_uppercase() {
        let var = EfiVar::pxe_boot_option(0x0099, "b8:27:eb:12:34:56".parse().unwrap());
        assert_eq!(var.name.to_string(), "Boot0099");
        let entry = var.boot_entry().unwrap();
        assert_eq!(entry.title.to_string(), "UEFI PXEv4 (MAC:B8:27:EB:12:34:56)");
        assert_eq!(entry.attr & LOAD_OPTION_ACTIVE, LOAD_OPTION_ACTIVE);
    }

    #[test]
    fn boot_next_data_is_little_endian() {
        assert_eq!(EfiVar::boot_next(0x0099).data, vec![0x99, 0x00]);
    }
}
