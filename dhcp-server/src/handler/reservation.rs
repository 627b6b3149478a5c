/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Reservation mode: full DHCP service for known MACs.
//!
//! The backend owns the 1:1 MAC to IP binding; this handler copies the
//! record into an OFFER/ACK and attaches netboot options when the client
//! is a netboot candidate. Unknown MACs are silently dropped so another
//! DHCP server can own them.

use std::sync::Arc;

use anvil_backend::BackendReader;
use async_trait::async_trait;
use dhcproto::v4::{DhcpOption, Message, MessageType};

use crate::handler::{is_netboot_candidate, DhcpHandler, HandlerConfig};
use crate::options;
use crate::packet::DecodedPacket;
use crate::DhcpError;

pub struct ReservationHandler {
    backend: Arc<dyn BackendReader>,
    config: HandlerConfig,
}

impl ReservationHandler {
    pub fn new(backend: Arc<dyn BackendReader>, config: HandlerConfig) -> Self {
        Self { backend, config }
    }
}

#[async_trait]
impl DhcpHandler for ReservationHandler {
    async fn handle(&self, packet: &DecodedPacket) -> Result<Option<Message>, DhcpError> {
        let message_type = match packet.message_type() {
            Some(mt) => mt,
            None => {
                tracing::info!("dropping packet without a message type");
                return Ok(None);
            }
        };
        let reply_type = match message_type {
            MessageType::Discover => MessageType::Offer,
            MessageType::Request | MessageType::Inform => MessageType::Ack,
            other => {
                tracing::debug!(message_type = ?other, "not a boot exchange, dropping");
                return Ok(None);
            }
        };

        let req = packet.client_request()?;
        let hw = match self.backend.get_by_mac(req.mac).await {
            Ok(hw) => hw,
            Err(err) if err.is_not_found() => {
                tracing::info!(mac = %req.mac, "no reservation, dropping packet");
                return Ok(None);
            }
            Err(err) => {
                tracing::error!(mac = %req.mac, %err, "backend lookup failed, dropping packet");
                return Ok(None);
            }
        };

        let mut reply = options::base_reply(packet, reply_type);
        if message_type != MessageType::Inform {
            reply.set_yiaddr(hw.dhcp.ip_address);
        }
        reply
            .opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.config.ip_for_packet));
        options::lease_options(&mut reply, &hw.dhcp, self.config.syslog_addr);

        if self.config.netboot_enabled
            && is_netboot_candidate(&req, self.config.custom_user_class())
        {
            let trace = self.config.new_trace();
            let selection = self
                .config
                .selector
                .select(&req, &hw.netboot, trace.as_ref());
            options::netboot_options(
                &mut reply,
                &req,
                &selection,
                hw.dhcp.tftp_server_name.as_deref(),
                trace.as_ref(),
            );
        }

        tracing::info!(
            mac = %req.mac,
            yiaddr = %hw.dhcp.ip_address,
            reply = ?reply_type,
            "reservation reply"
        );
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{discover, handler_config, hardware, raw_option, MapBackend};
    use crate::options::find_suboption;
    use dhcproto::v4::OptionCode;
    use std::net::Ipv4Addr;

    fn handler_with(records: Vec<anvil_backend::Hardware>) -> ReservationHandler {
        ReservationHandler::new(Arc::new(MapBackend::with(records)), handler_config())
    }

    #[tokio::test]
    async fn legacy_bios_pxe_discover_gets_full_offer() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = discover(
            "aa:bb:cc:00:11:22",
            0,
            Some("PXEClient:Arch:00000:UNDI:002001"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.yiaddr(), "10.0.0.42".parse::<Ipv4Addr>().unwrap());
        assert_eq!(reply.siaddr(), "192.0.2.4".parse::<Ipv4Addr>().unwrap());

        // Option 54, 66, 67 populated; option 60 absent for plain PXE.
        assert_eq!(raw_option(&reply, 54).unwrap(), vec![192, 0, 2, 2]);
        assert_eq!(raw_option(&reply, 66).unwrap(), b"192.0.2.4".to_vec());
        assert_eq!(raw_option(&reply, 67).unwrap(), b"undionly.kpxe".to_vec());
        assert!(reply.opts().get(OptionCode::ClassIdentifier).is_none());

        // Lease data from the record.
        assert_eq!(raw_option(&reply, 1).unwrap(), vec![255, 255, 255, 0]);
        assert_eq!(raw_option(&reply, 3).unwrap(), vec![10, 0, 0, 1]);
        assert_eq!(raw_option(&reply, 12).unwrap(), b"worker-1".to_vec());
        assert_eq!(raw_option(&reply, 7).unwrap(), vec![192, 0, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_mac_is_silently_dropped() {
        let handler = handler_with(vec![]);
        let msg = discover("de:ad:be:ef:00:01", 0, None, None);
        let packet = DecodedPacket::from_message(msg);

        assert!(handler.handle(&packet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn request_yields_ack() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = crate::handler::tests::request_packet(
            MessageType::Request,
            "aa:bb:cc:00:11:22",
            0,
            Some("PXEClient:Arch:00000:UNDI:002001"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(raw_option(&reply, 53).unwrap(), vec![5]); // DHCPACK
    }

    #[tokio::test]
    async fn inform_ack_has_no_yiaddr() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = crate::handler::tests::request_packet(
            MessageType::Inform,
            "aa:bb:cc:00:11:22",
            0,
            None,
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.yiaddr(), Ipv4Addr::UNSPECIFIED);
    }

    #[tokio::test]
    async fn netboot_denied_advertises_the_marker() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", false)]);
        let msg = discover(
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.siaddr(), Ipv4Addr::UNSPECIFIED);
        // Bootfile header carries the marker; no option 67/43.
        assert!(raw_option(&reply, 67).is_none());
        assert!(raw_option(&reply, 43).is_none());
    }

    #[tokio::test]
    async fn ipxe_user_class_is_chained_to_the_script_url() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = discover(
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            Some("iPXE"),
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(
            raw_option(&reply, 67).unwrap(),
            b"http://192.0.2.5:7171/ipxe/script/auto.ipxe".to_vec()
        );
    }

    #[tokio::test]
    async fn vendor_option_bypasses_the_boot_menu() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = discover(
            "aa:bb:cc:00:11:22",
            7,
            Some("PXEClient:Arch:00007:UNDI:003016"),
            None,
        );
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        let vendor = raw_option(&reply, 43).unwrap();
        assert_eq!(find_suboption(&vendor, 6).unwrap(), vec![8]);
    }

    #[tokio::test]
    async fn non_netboot_clients_get_a_plain_lease() {
        let handler = handler_with(vec![hardware("aa:bb:cc:00:11:22", true)]);
        let msg = discover("aa:bb:cc:00:11:22", 0, None, None);
        let packet = DecodedPacket::from_message(msg);

        let reply = handler.handle(&packet).await.unwrap().expect("reply");
        assert_eq!(reply.yiaddr(), "10.0.0.42".parse::<Ipv4Addr>().unwrap());
        assert!(raw_option(&reply, 67).is_none());
        assert!(raw_option(&reply, 43).is_none());
    }
}
