/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use url::Url;

/// One classless static route (option 121).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub destination: Ipv4Network,
    pub gateway: Ipv4Addr,
}

/// DHCP lease data for a machine interface.
///
/// The reservation handler copies these fields into the reply more or less
/// verbatim; there is no lease allocation here, the backend owns the 1:1
/// MAC to IP binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpData {
    pub mac_address: MacAddress,
    pub ip_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    #[serde(default)]
    pub default_gateway: Option<Ipv4Addr>,
    /// Lease time in seconds.
    #[serde(default = "default_lease_time")]
    pub lease_time: u32,
    #[serde(default)]
    pub name_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ntp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_search: Vec<String>,
    #[serde(default)]
    pub broadcast_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub classless_static_routes: Vec<StaticRoute>,
    /// Explicit TFTP server name override (option 66 / sname).
    #[serde(default)]
    pub tftp_server_name: Option<String>,
    /// Explicit bootfile override (option 67 / file).
    #[serde(default)]
    pub boot_file_name: Option<String>,
    #[serde(default)]
    pub vlan_id: Option<String>,
    /// Machine architecture, canonical form: `x86_64` or `aarch64`.
    #[serde(default)]
    pub arch: Option<String>,
}

fn default_lease_time() -> u32 {
    3600
}

/// Location of the OS installation environment artifacts for one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Osie {
    /// Kernel filename. Empty means `vmlinuz-<arch>`.
    #[serde(default)]
    pub kernel: Option<String>,
    /// Initramfs filename. Empty means `initramfs-<arch>`.
    #[serde(default)]
    pub initrd: Option<String>,
    /// Base URL the kernel/initrd are downloaded from. Empty means the
    /// deployment-wide artifact URL.
    #[serde(default)]
    pub base_url: Option<Url>,
}

/// Netboot policy and overrides for a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetbootData {
    #[serde(default)]
    pub allow_netboot: bool,
    /// Per-machine override for the iPXE script URL.
    #[serde(default)]
    pub ipxe_script_url: Option<Url>,
    /// Per-machine override for the iPXE binary name.
    #[serde(default)]
    pub ipxe_binary: Option<String>,
    #[serde(default)]
    pub osie: Osie,
    #[serde(default)]
    pub facility: String,
}

/// A full hardware record: the two halves every consumer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    pub dhcp: DhcpData,
    #[serde(default)]
    pub netboot: NetbootData,
}

impl Hardware {
    /// Canonical architecture for boot script generation, falling back to
    /// `x86_64` when the record carries none.
    pub fn arch_or_default(&self) -> &str {
        self.dhcp.arch.as_deref().unwrap_or("x86_64")
    }
}
