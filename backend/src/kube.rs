/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Kubernetes-backed hardware inventory.
//!
//! Hardware records live in `Hardware` custom resources; each resource
//! describes one machine with one or more interfaces. Lookups scan the
//! namespace and match on the interface MAC or IP, which is fine for the
//! rack-scale fleets this serves.

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, CustomResource};
use mac_address::MacAddress;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{BackendError, BackendReader, DhcpData, NetbootData, Osie, StaticRoute};

/// One machine's inventory record.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "anvil.metal",
    version = "v1alpha1",
    kind = "Hardware",
    plural = "hardware"
)]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netboot: Option<NetbootSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DhcpSpec {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Lease time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_time: Option<u32>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub time_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_search: Vec<String>,
    #[serde(default)]
    pub static_routes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tftp_server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpSpec {
    pub address: String,
    pub netmask: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetbootSpec {
    #[serde(default)]
    pub allow_netboot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipxe_binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osie_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osie_kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osie_initrd: Option<String>,
    #[serde(default)]
    pub facility: String,
}

/// A backend reader over `Hardware` resources in one namespace.
pub struct KubeBackend {
    api: Api<self::Hardware>,
}

impl KubeBackend {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    async fn find<F>(&self, key: &str, matches: F) -> Result<crate::Hardware, BackendError>
    where
        F: Fn(&DhcpSpec) -> bool,
    {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|err| BackendError::InvalidRecord {
                key: key.to_string(),
                reason: format!("kubernetes list failed: {err}"),
            })?;

        for resource in list {
            for interface in &resource.spec.interfaces {
                let Some(dhcp) = &interface.dhcp else {
                    continue;
                };
                if matches(dhcp) {
                    return interface_to_model(interface);
                }
            }
        }
        Err(BackendError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl BackendReader for KubeBackend {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<crate::Hardware, BackendError> {
        let wanted = mac.to_string().to_lowercase();
        self.find(&wanted, |dhcp| dhcp.mac.to_lowercase() == wanted)
            .await
    }

    async fn get_by_ip(&self, ip: IpAddr) -> Result<crate::Hardware, BackendError> {
        let wanted = ip.to_string();
        self.find(&wanted, |dhcp| {
            dhcp.ip.as_ref().is_some_and(|spec| spec.address == wanted)
        })
        .await
    }
}

/// Convert one interface spec to the model record. String-typed fields
/// from the resource are parsed here so the serving path never sees a
/// half-valid record.
pub fn interface_to_model(interface: &InterfaceSpec) -> Result<crate::Hardware, BackendError> {
    let Some(dhcp) = &interface.dhcp else {
        return Err(invalid("<interface>", "interface carries no dhcp block"));
    };
    let key = dhcp.mac.clone();

    let mac_address = dhcp
        .mac
        .parse::<MacAddress>()
        .map_err(|_| invalid(&key, "invalid mac"))?;
    let ip = dhcp
        .ip
        .as_ref()
        .ok_or_else(|| invalid(&key, "interface carries no ip block"))?;

    let mut classless_static_routes = Vec::new();
    for (destination, gateway) in &dhcp.static_routes {
        classless_static_routes.push(StaticRoute {
            destination: destination
                .parse()
                .map_err(|_| invalid(&key, "invalid static route destination"))?,
            gateway: gateway
                .parse()
                .map_err(|_| invalid(&key, "invalid static route gateway"))?,
        });
    }

    let netboot = match &interface.netboot {
        Some(spec) => NetbootData {
            allow_netboot: spec.allow_netboot,
            ipxe_script_url: parse_opt_url(&key, spec.ipxe_script_url.as_deref())?,
            ipxe_binary: spec.ipxe_binary.clone(),
            osie: Osie {
                kernel: spec.osie_kernel.clone(),
                initrd: spec.osie_initrd.clone(),
                base_url: parse_opt_url(&key, spec.osie_base_url.as_deref())?,
            },
            facility: spec.facility.clone(),
        },
        None => NetbootData::default(),
    };

    Ok(crate::Hardware {
        dhcp: DhcpData {
            mac_address,
            ip_address: parse_addr(&key, &ip.address, "ip address")?,
            subnet_mask: parse_addr(&key, &ip.netmask, "netmask")?,
            default_gateway: ip
                .gateway
                .as_deref()
                .map(|g| parse_addr(&key, g, "gateway"))
                .transpose()?,
            lease_time: dhcp.lease_time.unwrap_or(3600),
            name_servers: parse_addrs(&key, &dhcp.name_servers, "name server")?,
            ntp_servers: parse_addrs(&key, &dhcp.time_servers, "time server")?,
            domain_name: dhcp.domain_name.clone(),
            domain_search: dhcp.domain_search.clone(),
            broadcast_address: ip
                .broadcast
                .as_deref()
                .map(|b| parse_addr(&key, b, "broadcast"))
                .transpose()?,
            hostname: dhcp.hostname.clone(),
            classless_static_routes,
            tftp_server_name: dhcp.tftp_server_name.clone(),
            boot_file_name: dhcp.boot_file_name.clone(),
            vlan_id: dhcp.vlan_id.clone(),
            arch: dhcp.arch.clone(),
        },
        netboot,
    })
}

fn invalid(key: &str, reason: &str) -> BackendError {
    BackendError::InvalidRecord {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_addr(
    key: &str,
    value: &str,
    what: &str,
) -> Result<std::net::Ipv4Addr, BackendError> {
    value
        .parse()
        .map_err(|_| invalid(key, &format!("invalid {what}: {value}")))
}

fn parse_addrs(
    key: &str,
    values: &[String],
    what: &str,
) -> Result<Vec<std::net::Ipv4Addr>, BackendError> {
    values.iter().map(|v| parse_addr(key, v, what)).collect()
}

fn parse_opt_url(key: &str, value: Option<&str>) -> Result<Option<url::Url>, BackendError> {
    value
        .map(|v| v.parse().map_err(|_| invalid(key, &format!("invalid url: {v}"))))
        .transpose()
}
