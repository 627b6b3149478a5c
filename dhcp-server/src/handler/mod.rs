/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! DHCP handler personalities.

pub mod proxy;
pub mod reservation;

use std::net::Ipv4Addr;

use anvil_boot::{ClientRequest, Selector, Traceparent};
use async_trait::async_trait;
use dhcproto::v4::Message;

use crate::packet::DecodedPacket;
use crate::DhcpError;

/// One DHCP personality. The server holds an ordered list and asks each
/// in turn; `Ok(None)` means the handler does not claim the packet.
#[async_trait]
pub trait DhcpHandler: Send + Sync {
    async fn handle(&self, packet: &DecodedPacket) -> Result<Option<Message>, DhcpError>;
}

/// Settings shared by both handler personalities.
#[derive(Clone)]
pub struct HandlerConfig {
    /// Server identifier for option 54.
    pub ip_for_packet: Ipv4Addr,
    /// Syslog server advertised in option 7, when configured.
    pub syslog_addr: Option<Ipv4Addr>,
    /// The artifact selector shared with the TFTP and HTTP routers.
    pub selector: Selector,
    /// Whether netboot options are attached at all.
    pub netboot_enabled: bool,
    /// Whether replies carry a fresh trace context (option 43 sub-option
    /// 69 and the bootfile suffix).
    pub trace_enabled: bool,
}

impl HandlerConfig {
    /// A fresh sampled trace context for one exchange, when enabled.
    pub(crate) fn new_trace(&self) -> Option<Traceparent> {
        if !self.trace_enabled {
            return None;
        }
        let trace_id: [u8; 16] = rand::random();
        let span_id: [u8; 8] = rand::random();
        Some(Traceparent {
            version: 0,
            trace_id,
            span_id,
            flags: 0x01,
        })
    }

    pub(crate) fn custom_user_class(&self) -> Option<&str> {
        self.selector.config().custom_user_class.as_deref()
    }
}

/// A request is a netboot candidate when it advertises a PXE or HTTP
/// boot vendor class or is already running iPXE.
pub(crate) fn is_netboot_candidate(req: &ClientRequest, custom_user_class: Option<&str>) -> bool {
    req.is_pxe_client() || req.is_http_client() || req.is_ipxe(custom_user_class)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anvil_backend::{BackendError, BackendReader, DhcpData, Hardware, NetbootData};
    use anvil_boot::{MacFormat, SelectorConfig};
    use dhcproto::v4::{self, DhcpOption, MessageType, OptionCode, UnknownOption};
    use mac_address::MacAddress;
    use std::collections::HashMap;
    use std::net::IpAddr;

    /// Make an encoded DISCOVER/REQUEST the way PXE firmware would.
    pub(crate) fn request_packet(
        mt: MessageType,
        mac: &str,
        arch: u16,
        vendor_class: Option<&str>,
        user_class: Option<&str>,
    ) -> Message {
        let mac: MacAddress = mac.parse().unwrap();
        let mut msg = Message::default();
        msg.set_opcode(v4::Opcode::BootRequest)
            .set_htype(v4::HType::Eth)
            .set_xid(0x2904_8899)
            .set_chaddr(&mac.bytes());

        let opts = msg.opts_mut();
        opts.insert(DhcpOption::MessageType(mt));
        opts.insert(DhcpOption::ClientSystemArchitecture(arch.into()));
        if let Some(vc) = vendor_class {
            opts.insert(DhcpOption::ClassIdentifier(vc.as_bytes().to_vec()));
        }
        if let Some(uc) = user_class {
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::from(77),
                uc.as_bytes().to_vec(),
            )));
        }
        msg
    }

    pub(crate) fn discover(
        mac: &str,
        arch: u16,
        vendor_class: Option<&str>,
        user_class: Option<&str>,
    ) -> Message {
        request_packet(MessageType::Discover, mac, arch, vendor_class, user_class)
    }

    pub(crate) fn handler_config() -> HandlerConfig {
        HandlerConfig {
            ip_for_packet: "192.0.2.2".parse().unwrap(),
            syslog_addr: Some("192.0.2.3".parse().unwrap()),
            selector: Selector::new(SelectorConfig {
                tftp_addr: "192.0.2.4:69".parse().unwrap(),
                http_binary_url: "http://192.0.2.5:7171/ipxe/binary/".parse().unwrap(),
                ipxe_script_url: "http://192.0.2.5:7171/ipxe/script/auto.ipxe".parse().unwrap(),
                inject_mac: MacFormat::None,
                custom_user_class: None,
                arch_overrides: HashMap::new(),
            }),
            netboot_enabled: true,
            trace_enabled: false,
        }
    }

    pub(crate) struct MapBackend {
        records: Vec<Hardware>,
    }

    impl MapBackend {
        pub(crate) fn with(records: Vec<Hardware>) -> Self {
            Self { records }
        }

        pub(crate) fn empty() -> Self {
            Self { records: vec![] }
        }
    }

    #[async_trait]
    impl BackendReader for MapBackend {
        async fn get_by_mac(&self, mac: MacAddress) -> Result<Hardware, BackendError> {
            self.records
                .iter()
                .find(|hw| hw.dhcp.mac_address == mac)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(mac.to_string()))
        }

        async fn get_by_ip(&self, ip: IpAddr) -> Result<Hardware, BackendError> {
            Err(BackendError::NotFound(ip.to_string()))
        }
    }

    pub(crate) fn hardware(mac: &str, allow_netboot: bool) -> Hardware {
        Hardware {
            dhcp: DhcpData {
                mac_address: mac.parse().unwrap(),
                ip_address: "10.0.0.42".parse().unwrap(),
                subnet_mask: "255.255.255.0".parse().unwrap(),
                default_gateway: Some("10.0.0.1".parse().unwrap()),
                lease_time: 7200,
                name_servers: vec!["10.0.0.2".parse().unwrap()],
                ntp_servers: vec![],
                domain_name: Some("lab1.example".to_string()),
                domain_search: vec!["lab1.example".to_string()],
                broadcast_address: Some("10.0.0.255".parse().unwrap()),
                hostname: Some("worker-1".to_string()),
                classless_static_routes: vec![],
                tftp_server_name: None,
                boot_file_name: None,
                vlan_id: None,
                arch: None,
            },
            netboot: NetbootData {
                allow_netboot,
                facility: "lab1".to_string(),
                ..NetbootData::default()
            },
        }
    }

    /// Pull an option's raw payload out of a reply.
    pub(crate) fn raw_option(msg: &Message, code: u8) -> Option<Vec<u8>> {
        use dhcproto::Encodable;

        msg.opts()
            .iter()
            .find(|(c, _)| u8::from(**c) == code)
            .map(|(_, opt)| {
                let mut buf = Vec::new();
                let mut enc = dhcproto::Encoder::new(&mut buf);
                opt.encode(&mut enc).unwrap();
                buf[2..].to_vec()
            })
    }
}
