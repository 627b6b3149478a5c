/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! EDK2 firmware volume parsing and re-serialization.
//!
//! The NVRAM region is located by scanning the image for the `_NVDATA_`
//! volume GUID, the `_FVH_` header is validated, and the authenticated
//! variable store that follows is walked record by record. Serialization
//! writes the variable list back into the store region, pads the tail
//! with 0xFF to the original store end, and preserves every byte outside
//! the store verbatim.

use crate::efi::{EfiVar, Guid, Ucs16String, VarList};
use crate::FirmwareError;

/// `_FVH` little-endian.
const FVH_SIGNATURE: u32 = 0x4856_465f;

/// Variable store header: GUID, size, format byte, state byte, reserved.
const STORE_HEADER_LEN: usize = 28;

/// Fixed variable record header length, GUID excluded.
const VAR_HEADER_LEN: usize = 44;

const VAR_MAGIC: u16 = 0x55aa;
const VAR_STATE_LIVE: u8 = 0x3f;

const STORE_FORMAT_AUTH: u8 = 0x5a;
const STORE_STATE_HEALTHY: u8 = 0xfe;

/// A parsed firmware volume: the full image plus the located bounds of
/// the variable area inside it.
#[derive(Debug, Clone)]
pub struct VarStore {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl VarStore {
    /// Locate and validate the variable store inside a firmware image.
    pub fn parse(image: &[u8]) -> Result<Self, FirmwareError> {
        let offset = find_nv_data(image).ok_or(FirmwareError::VolumeNotFound)?;

        let le32 = |off: usize| -> Option<u32> {
            image
                .get(off..off + 4)
                .map(|b| u32::from_le_bytes(b.try_into().expect("4 bytes")))
        };
        let le16 = |off: usize| -> Option<u16> {
            image
                .get(off..off + 2)
                .map(|b| u16::from_le_bytes(b.try_into().expect("2 bytes")))
        };

        let sig = le32(offset + 40).ok_or(FirmwareError::VolumeNotFound)?;
        if sig != FVH_SIGNATURE {
            return Err(FirmwareError::BadSignature(sig));
        }
        let guid = Guid::parse_at(image, offset + 16).ok_or(FirmwareError::VolumeNotFound)?;
        if guid != Guid::NV_DATA {
            return Err(FirmwareError::BadVolumeGuid(guid.to_string()));
        }

        let header_len = le16(offset + 48).ok_or(FirmwareError::VolumeNotFound)? as usize;
        let store_off = offset + header_len;

        let store_guid =
            Guid::parse_at(image, store_off).ok_or(FirmwareError::VolumeNotFound)?;
        if store_guid != Guid::AUTH_VARS {
            return Err(FirmwareError::BadStoreGuid(store_guid.to_string()));
        }
        let store_size = le32(store_off + 16).ok_or(FirmwareError::VolumeNotFound)? as usize;
        let format = *image
            .get(store_off + 20)
            .ok_or(FirmwareError::VolumeNotFound)?;
        if format != STORE_FORMAT_AUTH {
            return Err(FirmwareError::BadStoreFormat(format));
        }
        let state = *image
            .get(store_off + 21)
            .ok_or(FirmwareError::VolumeNotFound)?;
        if state != STORE_STATE_HEALTHY {
            return Err(FirmwareError::BadStoreState(state));
        }

        let start = store_off + STORE_HEADER_LEN;
        let end = store_off + store_size;
        if end > image.len() || start > end {
            return Err(FirmwareError::StoreTooSmall {
                need: end,
                have: image.len(),
            });
        }

        tracing::debug!(offset, start, end, "parsed firmware variable store");
        Ok(Self {
            data: image.to_vec(),
            start,
            end,
        })
    }

    /// Walk the record stream and collect live variables. Records with the
    /// same name supersede earlier ones.
    pub fn var_list(&self) -> Result<VarList, FirmwareError> {
        let mut list = VarList::new();
        let mut pos = self.start;

        while pos + VAR_HEADER_LEN + 16 <= self.end {
            let magic = u16::from_le_bytes([self.data[pos], self.data[pos + 1]]);
            if magic != VAR_MAGIC {
                break;
            }
            let state = self.data[pos + 2];
            let attr =
                u32::from_le_bytes(self.data[pos + 4..pos + 8].try_into().expect("4 bytes"));
            let count =
                u64::from_le_bytes(self.data[pos + 8..pos + 16].try_into().expect("8 bytes"));
            let mut time = [0u8; 16];
            time.copy_from_slice(&self.data[pos + 16..pos + 32]);
            let pk_idx =
                u32::from_le_bytes(self.data[pos + 32..pos + 36].try_into().expect("4 bytes"));
            let name_size =
                u32::from_le_bytes(self.data[pos + 36..pos + 40].try_into().expect("4 bytes"))
                    as usize;
            let data_size =
                u32::from_le_bytes(self.data[pos + 40..pos + 44].try_into().expect("4 bytes"))
                    as usize;

            let record_end = pos + VAR_HEADER_LEN + 16 + name_size + data_size;
            if record_end > self.end {
                return Err(FirmwareError::TruncatedRecord(pos));
            }

            if state == VAR_STATE_LIVE {
                let guid = Guid::parse_at(&self.data, pos + VAR_HEADER_LEN)
                    .ok_or(FirmwareError::TruncatedRecord(pos))?;
                let name = Ucs16String::parse_at(&self.data, pos + VAR_HEADER_LEN + 16);
                let data_off = pos + VAR_HEADER_LEN + 16 + name_size;
                let data = self.data[data_off..data_off + data_size].to_vec();

                list.upsert(EfiVar {
                    name,
                    guid,
                    attr,
                    count,
                    time,
                    pk_idx,
                    data,
                });
            }

            pos = record_end;
            pos = (pos + 3) & !3;
        }

        Ok(list)
    }

    /// Serialize `vars` back into the store region: prefix verbatim,
    /// records, 0xFF padding to the original store end, suffix verbatim.
    pub fn serialize(&self, vars: &VarList) -> Result<Vec<u8>, FirmwareError> {
        let records = vars.bytes();
        let capacity = self.end - self.start;
        if records.len() > capacity {
            return Err(FirmwareError::StoreTooSmall {
                need: records.len(),
                have: capacity,
            });
        }

        let mut out = Vec::with_capacity(self.data.len());
        out.extend_from_slice(&self.data[..self.start]);
        out.extend_from_slice(&records);
        out.resize(self.end, 0xff);
        out.extend_from_slice(&self.data[self.end..]);
        Ok(out)
    }
}

/// Scan for the `_NVDATA_` volume header: 1024-byte strides, skipping any
/// leading FFS volumes by their declared length.
fn find_nv_data(image: &[u8]) -> Option<usize> {
    let mut offset = 0usize;
    while offset + 64 < image.len() {
        let guid = Guid::parse_at(image, offset + 16)?;
        if guid == Guid::NV_DATA {
            return Some(offset);
        }
        if guid == Guid::FFS {
            let len = u64::from_le_bytes(image.get(offset + 32..offset + 40)?.try_into().ok()?);
            if len == 0 {
                return None;
            }
            offset = offset.checked_add(len as usize)?;
            continue;
        }
        offset += 1024;
    }
    None
}
