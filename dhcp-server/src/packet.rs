/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Received-packet decoding and the boot-relevant view of it.

use std::net::Ipv4Addr;

use anvil_boot::{ClientArch, ClientRequest};
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use mac_address::MacAddress;

use crate::DhcpError;

/// A decoded DHCP packet plus helpers for the fields boot dispatch cares
/// about.
pub struct DecodedPacket {
    message: Message,
}

impl DecodedPacket {
    pub fn decode(buf: &[u8]) -> Result<Self, DhcpError> {
        let message = Message::decode(&mut Decoder::new(buf))?;
        if message.opcode() != Opcode::BootRequest {
            return Err(DhcpError::NotARequest);
        }
        Ok(Self { message })
    }

    pub fn from_message(message: Message) -> Self {
        Self { message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.message.opts().get(OptionCode::MessageType) {
            Some(DhcpOption::MessageType(mt)) => Some(*mt),
            _ => None,
        }
    }

    /// Client hardware address; only Ethernet-sized addresses qualify.
    pub fn mac(&self) -> Result<MacAddress, DhcpError> {
        let chaddr = self.message.chaddr();
        if chaddr.len() < 6 {
            return Err(DhcpError::NoHardwareAddress);
        }
        let bytes: [u8; 6] = chaddr[..6]
            .try_into()
            .map_err(|_| DhcpError::NoHardwareAddress)?;
        Ok(MacAddress::new(bytes))
    }

    pub fn vendor_class_id(&self) -> Option<String> {
        match self.message.opts().get(OptionCode::ClassIdentifier) {
            Some(DhcpOption::ClassIdentifier(bytes)) => {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => None,
        }
    }

    pub fn client_arch(&self) -> Option<ClientArch> {
        match self.message.opts().get(OptionCode::ClientSystemArchitecture) {
            Some(DhcpOption::ClientSystemArchitecture(arch)) => {
                Some(ClientArch::from(u16::from(*arch)))
            }
            _ => self
                .raw_option(93)
                .filter(|raw| raw.len() >= 2)
                .map(|raw| ClientArch::from(u16::from_be_bytes([raw[0], raw[1]]))),
        }
    }

    pub fn user_class(&self) -> Option<String> {
        self.raw_option(77)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }

    /// Client machine identifier GUID (option 97), passed through verbatim.
    pub fn client_machine_id(&self) -> Option<Vec<u8>> {
        self.raw_option(97)
    }

    /// The wire payload of an option, regardless of whether the codec
    /// models it as a typed or unknown variant: re-encode and strip the
    /// code/length framing.
    fn raw_option(&self, code: u8) -> Option<Vec<u8>> {
        let opt = self
            .message
            .opts()
            .iter()
            .find(|(c, _)| u8::from(**c) == code)
            .map(|(_, opt)| opt)?;
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        opt.encode(&mut encoder).ok()?;
        (buf.len() >= 2).then(|| buf[2..].to_vec())
    }

    /// The boot-relevant snapshot handed to the selector.
    pub fn client_request(&self) -> Result<ClientRequest, DhcpError> {
        Ok(ClientRequest {
            mac: self.mac()?,
            arch: self.client_arch(),
            user_class: self.user_class(),
            vendor_class_id: self.vendor_class_id(),
            client_machine_id: self.client_machine_id(),
            xid: Some(self.message.xid()),
        })
    }

    /// Where the reply goes: the relay when the packet was relayed, the
    /// client's own address during renewal, broadcast otherwise.
    pub fn reply_destination(&self) -> (Ipv4Addr, u16) {
        if self.message.giaddr() != Ipv4Addr::UNSPECIFIED {
            return (self.message.giaddr(), 67);
        }
        if self.message.ciaddr() != Ipv4Addr::UNSPECIFIED {
            return (self.message.ciaddr(), 68);
        }
        (Ipv4Addr::BROADCAST, 68)
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, DhcpError> {
    let mut buf = Vec::with_capacity(300);
    let mut encoder = Encoder::new(&mut buf);
    message.encode(&mut encoder)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::discover;

    #[test]
    fn client_request_snapshot() {
        let msg = discover("aa:bb:cc:00:11:22", 7, Some("PXEClient:Arch:00007:UNDI:003016"), None);
        let pkt = DecodedPacket::from_message(msg);

        let req = pkt.client_request().unwrap();
        assert_eq!(req.mac.to_string().to_lowercase(), "aa:bb:cc:00:11:22");
        assert_eq!(req.arch, Some(ClientArch::EfiBc));
        assert!(req.is_pxe_client());
        assert!(!req.is_http_client());
    }

    #[test]
    fn reply_destination_prefers_relay() {
        let mut msg = discover("aa:bb:cc:00:11:22", 0, None, None);
        msg.set_giaddr("10.1.1.1".parse::<Ipv4Addr>().unwrap());
        let pkt = DecodedPacket::from_message(msg);
        assert_eq!(pkt.reply_destination(), ("10.1.1.1".parse().unwrap(), 67));
    }

    #[test]
    fn reply_destination_falls_back_to_broadcast() {
        let msg = discover("aa:bb:cc:00:11:22", 0, None, None);
        let pkt = DecodedPacket::from_message(msg);
        assert_eq!(pkt.reply_destination(), (Ipv4Addr::BROADCAST, 68));
    }

    #[test]
    fn round_trip_through_the_wire_format() {
        let msg = discover("aa:bb:cc:00:11:22", 7, Some("PXEClient:Arch:00007:UNDI:003016"), Some("iPXE"));
        let bytes = encode(&msg).unwrap();
        let decoded = DecodedPacket::decode(&bytes).unwrap();

        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
        assert_eq!(decoded.user_class().as_deref(), Some("iPXE"));
        assert_eq!(
            decoded.vendor_class_id().as_deref(),
            Some("PXEClient:Arch:00007:UNDI:003016")
        );
    }
}
