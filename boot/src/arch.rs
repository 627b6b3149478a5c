/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::{self, Display, Formatter};

use mac_address::MacAddress;

/// Client system architecture, from the IANA processor architecture type
/// registry carried in DHCP option 93.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientArch {
    /// 0 — Intel x86PC, legacy BIOS.
    X86Bios,
    /// 6 — x86 EFI (IA32).
    EfiIa32,
    /// 7 — EFI byte code.
    EfiBc,
    /// 9 — x86-64 EFI.
    EfiX64,
    /// 10 — 32-bit ARM EFI.
    EfiArm32,
    /// 11 — 64-bit ARM EFI.
    EfiArm64,
    /// 15 — x86 EFI booting from HTTP.
    HttpEfiIa32,
    /// 16 — x86-64 EFI booting from HTTP.
    HttpEfiX64,
    /// 18 — 32-bit ARM EFI booting from HTTP.
    HttpEfiArm32,
    /// 19 — 64-bit ARM EFI booting from HTTP.
    HttpEfiArm64,
    /// 21 — 32-bit ARM U-Boot.
    UbootArm32,
    /// 22 — 64-bit ARM U-Boot.
    UbootArm64,
    /// 41 — U-Boot on i.MX.
    UbootImx,
    /// Anything else the registry knows and we do not care about.
    Other(u16),
}

impl From<u16> for ClientArch {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::X86Bios,
            6 => Self::EfiIa32,
            7 => Self::EfiBc,
            9 => Self::EfiX64,
            10 => Self::EfiArm32,
            11 => Self::EfiArm64,
            15 => Self::HttpEfiIa32,
            16 => Self::HttpEfiX64,
            18 => Self::HttpEfiArm32,
            19 => Self::HttpEfiArm64,
            21 => Self::UbootArm32,
            22 => Self::UbootArm64,
            41 => Self::UbootImx,
            other => Self::Other(other),
        }
    }
}

impl ClientArch {
    pub fn code(self) -> u16 {
        match self {
            Self::X86Bios => 0,
            Self::EfiIa32 => 6,
            Self::EfiBc => 7,
            Self::EfiX64 => 9,
            Self::EfiArm32 => 10,
            Self::EfiArm64 => 11,
            Self::HttpEfiIa32 => 15,
            Self::HttpEfiX64 => 16,
            Self::HttpEfiArm32 => 18,
            Self::HttpEfiArm64 => 19,
            Self::UbootArm32 => 21,
            Self::UbootArm64 => 22,
            Self::UbootImx => 41,
            Self::Other(code) => code,
        }
    }

    /// U-Boot class clients never TFTP an iPXE binary; an empty bootfile
    /// suppresses netboot at the client.
    pub fn is_uboot(self) -> bool {
        matches!(self, Self::UbootArm32 | Self::UbootArm64 | Self::UbootImx)
    }

    /// Default iPXE binary for this architecture. Empty when the
    /// architecture has no netboot binary.
    pub fn default_binary(self) -> &'static str {
        match self {
            Self::X86Bios => "undionly.kpxe",
            Self::EfiIa32 | Self::EfiBc | Self::EfiX64 | Self::HttpEfiIa32 | Self::HttpEfiX64 => {
                "ipxe.efi"
            }
            Self::EfiArm32 | Self::EfiArm64 | Self::HttpEfiArm32 | Self::HttpEfiArm64 => "snp.efi",
            Self::UbootArm32 | Self::UbootArm64 | Self::UbootImx | Self::Other(_) => "",
        }
    }

    /// Canonical architecture name used in kernel/initramfs filenames.
    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::EfiArm32
            | Self::EfiArm64
            | Self::HttpEfiArm32
            | Self::HttpEfiArm64
            | Self::UbootArm32
            | Self::UbootArm64
            | Self::UbootImx => "aarch64",
            _ => "x86_64",
        }
    }
}

impl Display for ClientArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86Bios => write!(f, "Intel x86PC"),
            Self::EfiIa32 => write!(f, "x86 UEFI"),
            Self::EfiBc => write!(f, "EFI BC"),
            Self::EfiX64 => write!(f, "x64 UEFI"),
            Self::EfiArm32 => write!(f, "ARM 32-bit UEFI"),
            Self::EfiArm64 => write!(f, "ARM 64-bit UEFI"),
            Self::HttpEfiIa32 => write!(f, "x86 UEFI (HTTP)"),
            Self::HttpEfiX64 => write!(f, "x64 UEFI (HTTP)"),
            Self::HttpEfiArm32 => write!(f, "ARM 32-bit UEFI (HTTP)"),
            Self::HttpEfiArm64 => write!(f, "ARM 64-bit UEFI (HTTP)"),
            Self::UbootArm32 => write!(f, "ARM 32-bit U-Boot"),
            Self::UbootArm64 => write!(f, "ARM 64-bit U-Boot"),
            Self::UbootImx => write!(f, "U-Boot i.MX"),
            Self::Other(code) => write!(f, "arch {code}"),
        }
    }
}

/// OUI prefixes assigned to the Raspberry Pi Foundation. Requests from
/// these MACs with no usable architecture hint are treated as 64-bit ARM.
const RASPBERRY_PI_OUIS: [[u8; 3]; 6] = [
    [0xb8, 0x27, 0xeb],
    [0xdc, 0xa6, 0x32],
    [0xe4, 0x5f, 0x01],
    [0x2c, 0xcf, 0x67],
    [0xd8, 0x3a, 0xdd],
    [0x88, 0xa2, 0x9e],
];

pub fn is_raspberry_pi(mac: MacAddress) -> bool {
    let bytes = mac.bytes();
    RASPBERRY_PI_OUIS.iter().any(|oui| bytes[..3] == oui[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [0u16, 6, 7, 9, 10, 11, 15, 16, 18, 19, 21, 22, 41, 99] {
            assert_eq!(ClientArch::from(code).code(), code);
        }
    }

    #[test]
    fn legacy_bios_gets_undionly() {
        assert_eq!(ClientArch::X86Bios.default_binary(), "undionly.kpxe");
    }

    #[test]
    fn uboot_arches_have_no_binary() {
        for arch in [
            ClientArch::UbootArm32,
            ClientArch::UbootArm64,
            ClientArch::UbootImx,
        ] {
            assert!(arch.is_uboot());
            assert_eq!(arch.default_binary(), "");
        }
    }

    #[test]
    fn pi_ouis_are_recognized() {
        let pi: MacAddress = "b8:27:eb:12:34:56".parse().unwrap();
        let other: MacAddress = "aa:bb:cc:00:11:22".parse().unwrap();
        assert!(is_raspberry_pi(pi));
        assert!(!is_raspberry_pi(other));
    }
}
