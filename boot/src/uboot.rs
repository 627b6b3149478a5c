/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! U-Boot legacy image format.
//!
//! A 64-byte big-endian header followed by the payload, CRC-32 over both.
//! Used to wrap ARM64 boot scripts for U-Boot clients.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::BootError;

/// Image header magic number.
pub const IMAGE_MAGIC: u32 = 0x2705_1956;

const HEADER_LEN: usize = 64;
const NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageType {
    Standalone = 1,
    Kernel = 2,
    Ramdisk = 3,
    Firmware = 5,
    Script = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingSystem {
    Linux = 5,
    UBoot = 17,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UbootArch {
    Arm = 2,
    X86 = 3,
    Arm64 = 22,
    X8664 = 24,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Gzip = 1,
}

/// Parsed legacy image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    pub header_crc: u32,
    pub time: u32,
    pub size: u32,
    pub load_addr: u32,
    pub entry_point: u32,
    pub data_crc: u32,
    pub os: u8,
    pub arch: u8,
    pub image_type: u8,
    pub compression: u8,
    pub name: String,
}

/// Builds legacy images; defaults suit ARM64 script images.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    arch: UbootArch,
    image_type: ImageType,
    compression: Compression,
    os: OperatingSystem,
    name: String,
    load_addr: u32,
    entry_point: u32,
    timestamp: Option<u32>,
}

impl ImageBuilder {
    /// An ARM64 `SCRIPT`/`NONE`/`LINUX` image, the shape handed to
    /// U-Boot clients.
    pub fn script(name: &str) -> Self {
        Self {
            arch: UbootArch::Arm64,
            image_type: ImageType::Script,
            compression: Compression::None,
            os: OperatingSystem::Linux,
            name: name.to_string(),
            load_addr: 0,
            entry_point: 0,
            timestamp: None,
        }
    }

    pub fn arch(mut self, arch: UbootArch) -> Self {
        self.arch = arch;
        self
    }

    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn load_addr(mut self, addr: u32) -> Self {
        self.load_addr = addr;
        self
    }

    pub fn entry_point(mut self, entry: u32) -> Self {
        self.entry_point = entry;
        self
    }

    /// Fixed creation timestamp, for reproducible output.
    pub fn timestamp(mut self, secs: u32) -> Self {
        self.timestamp = Some(secs);
        self
    }

    pub fn build(&self, payload: &[u8]) -> Result<Vec<u8>, BootError> {
        if payload.is_empty() {
            return Err(BootError::EmptyPayload);
        }

        let time = self.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        });

        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&IMAGE_MAGIC.to_be_bytes());
        // Bytes 4..8 are the header CRC, zero while computing it.
        header[8..12].copy_from_slice(&time.to_be_bytes());
        header[12..16].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        header[16..20].copy_from_slice(&self.load_addr.to_be_bytes());
        header[20..24].copy_from_slice(&self.entry_point.to_be_bytes());
        header[24..28].copy_from_slice(&crc32fast::hash(payload).to_be_bytes());
        header[28] = self.os as u8;
        header[29] = self.arch as u8;
        header[30] = self.image_type as u8;
        header[31] = self.compression as u8;

        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_LEN - 1);
        header[32..32 + name_len].copy_from_slice(&name[..name_len]);

        let header_crc = crc32fast::hash(&header);
        header[4..8].copy_from_slice(&header_crc.to_be_bytes());

        let mut image = Vec::with_capacity(HEADER_LEN + payload.len());
        image.extend_from_slice(&header);
        image.extend_from_slice(payload);
        Ok(image)
    }
}

/// Parse a legacy image, validating both CRCs, and return the header and
/// a borrow of the payload.
pub fn parse_image(image: &[u8]) -> Result<(ImageHeader, &[u8]), BootError> {
    if image.len() < HEADER_LEN {
        return Err(BootError::ImageTooSmall(image.len()));
    }

    let be32 = |off: usize| u32::from_be_bytes(image[off..off + 4].try_into().expect("4 bytes"));

    let magic = be32(0);
    if magic != IMAGE_MAGIC {
        return Err(BootError::BadMagic(magic));
    }

    let header_crc = be32(4);
    let mut scratch = [0u8; HEADER_LEN];
    scratch.copy_from_slice(&image[..HEADER_LEN]);
    scratch[4..8].fill(0);
    let computed = crc32fast::hash(&scratch);
    if computed != header_crc {
        return Err(BootError::CrcMismatch {
            kind: "header",
            expected: header_crc,
            got: computed,
        });
    }

    let size = be32(12) as usize;
    if image.len() < HEADER_LEN + size {
        return Err(BootError::Truncated {
            declared: size,
            got: image.len() - HEADER_LEN,
        });
    }
    let payload = &image[HEADER_LEN..HEADER_LEN + size];

    let data_crc = be32(24);
    let computed = crc32fast::hash(payload);
    if computed != data_crc {
        return Err(BootError::CrcMismatch {
            kind: "data",
            expected: data_crc,
            got: computed,
        });
    }

    let name_raw = &image[32..32 + NAME_LEN];
    let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();

    let header = ImageHeader {
        magic,
        header_crc,
        time: be32(8),
        size: size as u32,
        load_addr: be32(16),
        entry_point: be32(20),
        data_crc,
        os: image[28],
        arch: image[29],
        image_type: image[30],
        compression: image[31],
        name,
    };

    Ok((header, payload))
}
