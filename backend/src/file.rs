/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use mac_address::MacAddress;

use crate::{BackendError, BackendReader, Hardware};

/// A backend reader that serves hardware records from a YAML file.
///
/// The file is a map of MAC address to [`Hardware`]:
///
/// ```yaml
/// "aa:bb:cc:00:11:22":
///   dhcp:
///     mac_address: "aa:bb:cc:00:11:22"
///     ip_address: 10.0.0.42
///     subnet_mask: 255.255.255.0
///   netboot:
///     allow_netboot: true
/// ```
///
/// Records are loaded once at startup; deployments that need live inventory
/// swap in a real backend behind the same trait.
pub struct FileBackend {
    by_mac: HashMap<MacAddress, Hardware>,
}

impl FileBackend {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, BackendError> {
        let records: HashMap<String, Hardware> = serde_yaml::from_str(raw)?;

        let mut by_mac = HashMap::with_capacity(records.len());
        for (key, hw) in records {
            let mac: MacAddress =
                key.parse().map_err(|_| BackendError::InvalidRecord {
                    key: key.clone(),
                    reason: "key is not a MAC address".to_string(),
                })?;
            if hw.dhcp.mac_address != mac {
                return Err(BackendError::InvalidRecord {
                    key,
                    reason: "record mac_address does not match its key".to_string(),
                });
            }
            by_mac.insert(mac, hw);
        }

        tracing::info!(records = by_mac.len(), "loaded hardware records");
        Ok(Self { by_mac })
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }
}

#[async_trait]
impl BackendReader for FileBackend {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<Hardware, BackendError> {
        self.by_mac
            .get(&mac)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(mac.to_string()))
    }

    async fn get_by_ip(&self, ip: IpAddr) -> Result<Hardware, BackendError> {
        self.by_mac
            .values()
            .find(|hw| IpAddr::V4(hw.dhcp.ip_address) == ip)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(ip.to_string()))
    }
}
