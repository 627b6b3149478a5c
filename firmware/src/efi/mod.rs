/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! EFI data types used by the variable store: GUIDs, UCS-16 strings,
//! device paths, boot entries, and authenticated variables.

mod bootentry;
mod devpath;
mod guid;
mod ucs16;
mod var;
mod varlist;

pub use bootentry::{BootEntry, LOAD_OPTION_ACTIVE};
pub use devpath::{DevicePath, DevicePathNode};
pub use guid::Guid;
pub use ucs16::Ucs16String;
pub use var::EfiVar;
pub use varlist::VarList;

#[cfg(test)]
pub mod testvol;
