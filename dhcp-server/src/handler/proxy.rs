/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Proxy mode: PXE-informational replies only.
//!
//! A separate DHCP server owns IP allocation; this handler answers just
//! the netboot portion of the exchange and never sets `yiaddr`. Requests
//! without a PXE/HTTPClient/iPXE signature are dropped. In auto-proxy
//! mode unknown MACs are served with static defaults instead of being
//! dropped.

use std::sync::Arc;

use anvil_backend::{BackendReader, NetbootData};
use async_trait::async_trait;
use dhcproto::v4::{DhcpOption, Message, MessageType};

use crate::handler::{is_netboot_candidate, DhcpHandler, HandlerConfig};
use crate::options;
use crate::packet::DecodedPacket;
use crate::DhcpError;

pub struct ProxyHandler {
    backend: Arc<dyn BackendReader>,
    config: HandlerConfig,
    auto_proxy: bool,
}

impl ProxyHandler {
    pub fn new(backend: Arc<dyn BackendReader>, config: HandlerConfig, auto_proxy: bool) -> Self {
        Self {
            backend,
            config,
            auto_proxy,
        }
    }
}

#[async_trait]
impl DhcpHandler for ProxyHandler {
    async fn handle(&self, packet: &DecodedPacket) -> Result<Option<Message>, DhcpError> {
        let reply_type = match packet.message_type() {
            Some(MessageType::Discover) => MessageType::Offer,
            Some(MessageType::Request) => MessageType::Ack,
            other => {
                tracing::debug!(message_type = ?other, "not a boot exchange, dropping");
                return Ok(None);
            }
        };

        let req = packet.client_request()?;
        if !self.auto_proxy && !is_netboot_candidate(&req, self.config.custom_user_class()) {
            tracing::debug!(mac = %req.mac, "not a netboot candidate, dropping");
            return Ok(None);
        }

        let netboot = match self.backend.get_by_mac(req.mac).await {
            Ok(hw) => hw.netboot,
            Err(err) if err.is_not_found() && self.auto_proxy => {
                // Unknown MACs are served with static defaults; the iPXE
                // script endpoint accepts them under the same flag.
                NetbootData {
                    allow_netboot: true,
                    ..NetbootData::default()
                }
            }
            Err(err) if err.is_not_found() => {
                tracing::info!(mac = %req.mac, "no hardware record, dropping packet");
                return Ok(None);
            }
            Err(err) => {
                tracing::error!(mac = %req.mac, %err, "backend lookup failed, dropping packet");
                return Ok(None);
            }
        };

        if !self.config.netboot_enabled {
            return Ok(None);
        }

        let trace = self.config.new_trace();
        let selection = self.config.selector.select(&req, &netboot, trace.as_ref());
        if netboot.allow_netboot && selection.is_empty() {
            // No binary for this architecture: nothing to advertise.
            tracing::debug!(mac = %req.mac, arch = %req.effective_arch(), "no binary for architecture, dropping");
            return Ok(None);
        }

        let mut reply = options::base_reply(packet, reply_type);
        reply
            .opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.config.ip_for_packet));
        options::netboot_options(&mut reply, &req, &selection, None, trace.as_ref());

        tracing::info!(
            mac = %req.mac,
            bootfile = %selection.bootfile,
            next_server = %selection.next_server,
            reply = ?reply_type,
            "proxy reply"
        );
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{
        discover, handler_config, hardware, raw_option, request_packet, MapBackend,
    };
    use crate::options::find_suboption;
    use std::net::Ipv4Addr;

    fn proxy(records: Vec<anvil_backend::Hardware>) -> ProxyHandler {
        ProxyHandler::new(Arc::new(MapBackend::with(records)), handler_config(), false)
    }

    fn auto_proxy() -> ProxyHandler {
        ProxyHandler::new(Arc::new(MapBackend::empty()), handler_config(), true)
    }

    #[tokio::test]
    async fn ipxe_chain_request_gets_script_url() {
        let handler = proxy(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = request_packet(
            MessageType::Request,
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            Some("iPXE"),
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.yiaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.siaddr(), "192.0.2.5".parse::<Ipv4Addr>().unwrap());
        assert_eq!(
            raw_option(&reply, 67).unwrap(),
            b"http://192.0.2.5:7171/ipxe/script/auto.ipxe".to_vec()
        );
        // ACK, option 60 absent for a plain PXE vendor class.
        assert_eq!(raw_option(&reply, 53).unwrap(), vec![5]);
        assert!(raw_option(&reply, 60).is_none());
    }

    #[tokio::test]
    async fn non_candidates_are_dropped() {
        let handler = proxy(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = discover("aa:bb:cc:00:11:22", 0, None, None);
        let packet = DecodedPacket::from_message(msg);

        assert!(handler.handle(&packet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_mac_is_dropped_without_auto_proxy() {
        let handler = proxy(vec![]);
        let msg = discover(
            "de:ad:be:ef:00:01",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        assert!(handler.handle(&packet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_proxy_serves_unknown_http_clients() {
        let handler = auto_proxy();
        let msg = discover(
            "de:ad:be:ef:00:01",
            16,
            Some("HTTPClient:Arch:00016:UNDI:003001"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.yiaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            raw_option(&reply, 67).unwrap(),
            b"http://192.0.2.5:7171/ipxe/binary/ipxe.efi".to_vec()
        );
        // Option 60 echoed for HTTPClient, option 43 sub-option 6 = 8.
        assert_eq!(raw_option(&reply, 60).unwrap(), b"HTTPClient".to_vec());
        let vendor = raw_option(&reply, 43).unwrap();
        assert_eq!(find_suboption(&vendor, 6).unwrap(), vec![8]);
    }

    #[tokio::test]
    async fn uboot_arch_is_left_alone() {
        let handler = auto_proxy();
        let msg = discover(
            "aa:bb:cc:00:11:22",
            22,
            Some("PXEClient:Arch:00022:UNDI:003001"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        assert!(handler.handle(&packet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn client_machine_id_is_echoed() {
        let handler = proxy(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let mut msg = discover(
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            None,
        );
        let guid = vec![0u8; 17];
        msg.opts_mut().insert(dhcproto::v4::DhcpOption::Unknown(
            dhcproto::v4::UnknownOption::new(dhcproto::v4::OptionCode::from(97), guid.clone()),
        ));
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(raw_option(&reply, 97).unwrap(), guid);
    }

    #[tokio::test]
    async fn trace_context_rides_in_suboption_69() {
        let mut config = handler_config();
        config.trace_enabled = true;
        let handler = ProxyHandler::new(
            Arc::new(MapBackend::with(vec![hardware("aa:bb:cc:00:11:22", true)])),
            config,
            false,
        );
        let msg = discover(
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        let vendor = raw_option(&reply, 43).unwrap();
        let tp = find_suboption(&vendor, 69).unwrap();
        assert_eq!(tp.len(), 26);
        assert_eq!(tp[25], 0x01);

        // The bootfile carries the same context as a filename suffix.
        let bootfile = String::from_utf8(raw_option(&reply, 67).unwrap()).unwrap();
        assert!(bootfile.starts_with("ipxe.efi-00-"));
    }
}
