/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Hardware inventory access for the netboot core.
//!
//! The inventory store itself is an external collaborator; this crate only
//! defines the narrow read interface the rest of the stack consumes
//! (`get_by_mac`/`get_by_ip`), the record types those lookups return, and a
//! YAML file-backed implementation for deployments without an inventory
//! service.

mod file;
pub mod kube;
mod model;

pub use file::FileBackend;
pub use kube::KubeBackend;
pub use model::{DhcpData, Hardware, NetbootData, Osie, StaticRoute};

use std::net::IpAddr;

use async_trait::async_trait;
use mac_address::MacAddress;

/// Errors returned by backend lookups.
///
/// `NotFound` is the only kind callers are expected to branch on: DHCP
/// handlers drop the packet, HTTP returns 404, TFTP returns file-not-found.
/// Every other kind is fatal to the current request.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no hardware record for {0}")]
    NotFound(String),

    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend data error: {0}")]
    Deserialize(#[from] serde_yaml::Error),

    #[error("invalid hardware record for {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}

impl BackendError {
    /// True when the lookup completed but no record exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// Read access to the hardware inventory.
///
/// Both lookups may return `BackendError::NotFound`; lookups for distinct
/// keys may race freely and callers must not assume a consistent snapshot
/// across calls.
#[async_trait]
pub trait BackendReader: Send + Sync {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<Hardware, BackendError>;
    async fn get_by_ip(&self, ip: IpAddr) -> Result<Hardware, BackendError>;
}

/// A backend with no records. Auto-proxy deployments without an
/// inventory run against this; every lookup is a clean miss.
pub struct NoopBackend;

#[async_trait]
impl BackendReader for NoopBackend {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<Hardware, BackendError> {
        Err(BackendError::NotFound(mac.to_string()))
    }

    async fn get_by_ip(&self, ip: IpAddr) -> Result<Hardware, BackendError> {
        Err(BackendError::NotFound(ip.to_string()))
    }
}
