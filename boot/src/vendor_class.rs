/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::Display;
use std::str::FromStr;

use crate::arch::ClientArch;

/// Client class from the vendor class identifier (option 60).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    PxeClient,
    HttpClient,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PxeClient => "PXEClient",
            Self::HttpClient => "HTTPClient",
        }
    }
}

/// Parsed vendor class identifier of a PXE-capable client, e.g.
/// `PXEClient:Arch:00007:UNDI:003016`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorClass {
    pub client_type: ClientType,
    pub arch: ClientArch,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VendorClassParseError {
    InvalidFormat,
    UnsupportedClientType,
    InvalidArchitecture,
}

impl FromStr for ClientType {
    type Err = VendorClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PXEClient" => Ok(Self::PxeClient),
            "HTTPClient" => Ok(Self::HttpClient),
            _ => Err(VendorClassParseError::UnsupportedClientType),
        }
    }
}

/// Convert a string of the form `A:Arch:NNNNN:...` to Self. The arch field
/// is base-10 per the PXE spec.
impl FromStr for VendorClass {
    type Err = VendorClassParseError;

    fn from_str(vendor_class: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = vendor_class.split(':').collect();
        if parts.len() < 3 {
            return Err(VendorClassParseError::InvalidFormat);
        }

        let client_type: ClientType = parts[0].parse()?;
        let code: u16 = parts[2]
            .parse()
            .map_err(|_| VendorClassParseError::InvalidArchitecture)?;

        Ok(VendorClass {
            client_type,
            arch: ClientArch::from(code),
        })
    }
}

impl VendorClass {
    pub fn pxe(&self) -> bool {
        self.client_type == ClientType::PxeClient
    }

    pub fn http(&self) -> bool {
        self.client_type == ClientType::HttpClient
    }
}

impl Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Display for VendorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.arch, self.client_type)
    }
}
