/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Reply assembly: header fields and option sets.

use std::net::Ipv4Addr;

use anvil_backend::{DhcpData, StaticRoute};
use anvil_boot::{ClientRequest, Selection, Traceparent};
use dhcproto::v4::{DhcpOption, HType, Message, MessageType, Opcode, OptionCode, UnknownOption};

use crate::packet::DecodedPacket;

/// PXE vendor sub-option: boot server discovery control.
const PXE_DISCOVERY_CONTROL: u8 = 6;
/// Discovery control value: bypass the boot menu, boot from the filename.
const PXE_BYPASS_BOOT_MENU: u8 = 8;
/// PXE vendor sub-option: boot menu, repurposed by the Raspberry Pi
/// bootloader as its netboot marker.
const PXE_BOOT_MENU: u8 = 9;
/// Vendor sub-option carrying the W3C trace context.
const TRACEPARENT_SUBOPTION: u8 = 69;

const RASPBERRY_PI_BOOT: &[u8] = b"Raspberry Pi Boot";

/// A reply skeleton mirroring the request's addressing fields.
pub(crate) fn base_reply(request: &DecodedPacket, reply_type: MessageType) -> Message {
    let src = request.message();
    let mut msg = Message::default();
    msg.set_opcode(Opcode::BootReply)
        .set_htype(HType::Eth)
        .set_hops(0)
        .set_xid(src.xid())
        .set_secs(0)
        .set_flags(src.flags())
        .set_ciaddr(src.ciaddr())
        .set_giaddr(src.giaddr())
        .set_chaddr(src.chaddr());
    msg.opts_mut().insert(DhcpOption::MessageType(reply_type));
    msg
}

/// Populate the lease options of a reservation reply from the hardware
/// record.
pub(crate) fn lease_options(msg: &mut Message, dhcp: &DhcpData, syslog: Option<Ipv4Addr>) {
    let opts = msg.opts_mut();
    opts.insert(DhcpOption::SubnetMask(dhcp.subnet_mask));
    opts.insert(DhcpOption::AddressLeaseTime(dhcp.lease_time));

    if let Some(gateway) = dhcp.default_gateway {
        opts.insert(DhcpOption::Router(vec![gateway]));
    }
    if !dhcp.name_servers.is_empty() {
        opts.insert(DhcpOption::DomainNameServer(dhcp.name_servers.clone()));
    }
    if !dhcp.ntp_servers.is_empty() {
        opts.insert(DhcpOption::NtpServers(dhcp.ntp_servers.clone()));
    }
    if let Some(hostname) = &dhcp.hostname {
        opts.insert(DhcpOption::Hostname(hostname.clone()));
    }
    if let Some(domain) = &dhcp.domain_name {
        opts.insert(DhcpOption::DomainName(domain.clone()));
    }
    if let Some(broadcast) = dhcp.broadcast_address {
        opts.insert(DhcpOption::BroadcastAddr(broadcast));
    }
    if let Some(syslog) = syslog {
        opts.insert(DhcpOption::LogServer(vec![syslog]));
    }
    if !dhcp.domain_search.is_empty() {
        opts.insert(unknown(119, encode_domain_search(&dhcp.domain_search)));
    }
    if !dhcp.classless_static_routes.is_empty() {
        opts.insert(unknown(
            121,
            encode_classless_routes(&dhcp.classless_static_routes),
        ));
    }

    // Explicit per-record overrides for the boot fields; netboot options
    // assembled later supersede these.
    if let Some(tftp) = &dhcp.tftp_server_name {
        msg.set_sname_str(tftp.as_str());
        msg.opts_mut().insert(unknown(66, tftp.as_bytes().to_vec()));
    }
    if let Some(bootfile) = &dhcp.boot_file_name {
        msg.set_fname_str(bootfile.as_str());
        msg.opts_mut()
            .insert(DhcpOption::BootfileName(bootfile.as_bytes().to_vec()));
    }
}

/// Attach the netboot portion of a reply.
///
/// The option 60 `HTTPClient` echo and the bootfile header are applied
/// even when the selection denies netboot; next-server, option 66/67 and
/// the vendor option are only attached for a real selection.
pub(crate) fn netboot_options(
    msg: &mut Message,
    req: &ClientRequest,
    selection: &Selection,
    sname_override: Option<&str>,
    trace: Option<&Traceparent>,
) {
    if req.is_http_client() {
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"HTTPClient".to_vec()));
    }
    if let Some(guid) = &req.client_machine_id {
        msg.opts_mut().insert(unknown(97, guid.clone()));
    }

    msg.set_fname_str(selection.bootfile.as_str());
    msg.set_siaddr(selection.next_server);

    if selection.is_empty() {
        return;
    }

    msg.opts_mut().insert(DhcpOption::BootfileName(
        selection.bootfile.as_bytes().to_vec(),
    ));

    if selection.next_server != Ipv4Addr::UNSPECIFIED {
        let sname = match sname_override {
            Some(name) => name.to_string(),
            None => selection.next_server.to_string(),
        };
        msg.set_sname_str(sname.as_str());
        msg.opts_mut().insert(unknown(66, sname.into_bytes()));

        msg.opts_mut()
            .insert(DhcpOption::VendorExtensions(vendor_suboptions(req, trace)));
    }
}

/// Option 43 sub-options: discovery control, trace context, and the
/// Raspberry Pi netboot marker for Pi clients.
pub(crate) fn vendor_suboptions(req: &ClientRequest, trace: Option<&Traceparent>) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(PXE_DISCOVERY_CONTROL);
    out.push(1);
    out.push(PXE_BYPASS_BOOT_MENU);

    if let Some(tp) = trace {
        let bytes = tp.to_bytes();
        out.push(TRACEPARENT_SUBOPTION);
        out.push(bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }

    if req.is_raspberry_pi() {
        out.push(PXE_BOOT_MENU);
        out.push(RASPBERRY_PI_BOOT.len() as u8);
        out.extend_from_slice(RASPBERRY_PI_BOOT);
    }

    out.push(0xff);
    out
}

/// RFC 3397 domain search list: uncompressed RFC 1035 names.
pub(crate) fn encode_domain_search(domains: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for domain in domains {
        for label in domain.split('.').filter(|l| !l.is_empty()) {
            let label = label.as_bytes();
            let len = label.len().min(63);
            out.push(len as u8);
            out.extend_from_slice(&label[..len]);
        }
        out.push(0);
    }
    out
}

/// RFC 3442 classless static routes: prefix length, significant
/// destination octets, gateway.
pub(crate) fn encode_classless_routes(routes: &[StaticRoute]) -> Vec<u8> {
    let mut out = Vec::new();
    for route in routes {
        let prefix = route.destination.prefix();
        out.push(prefix);
        let octets = route.destination.network().octets();
        let significant = (usize::from(prefix) + 7) / 8;
        out.extend_from_slice(&octets[..significant]);
        out.extend_from_slice(&route.gateway.octets());
    }
    out
}

fn unknown(code: u8, data: Vec<u8>) -> DhcpOption {
    DhcpOption::Unknown(UnknownOption::new(OptionCode::from(code), data))
}

/// Find an option 43 sub-option inside an encoded vendor option.
#[cfg(test)]
pub(crate) fn find_suboption(encoded: &[u8], code: u8) -> Option<Vec<u8>> {
    let mut pos = 0;
    while pos + 1 < encoded.len() {
        let sub = encoded[pos];
        if sub == 0xff {
            return None;
        }
        let len = encoded[pos + 1] as usize;
        if pos + 2 + len > encoded.len() {
            return None;
        }
        if sub == code {
            return Some(encoded[pos + 2..pos + 2 + len].to_vec());
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_boot::ClientRequest;

    fn route(dest: &str, gw: &str) -> StaticRoute {
        StaticRoute {
            destination: dest.parse().unwrap(),
            gateway: gw.parse().unwrap(),
        }
    }

    #[test]
    fn domain_search_encoding() {
        let encoded = encode_domain_search(&["lab1.example".to_string(), "example".to_string()]);
        assert_eq!(
            encoded,
            [
                4, b'l', b'a', b'b', b'1', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0, //
                7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0,
            ]
        );
    }

    #[test]
    fn classless_route_encoding_uses_significant_octets() {
        let encoded = encode_classless_routes(&[
            route("10.0.0.0/8", "10.1.2.3"),
            route("192.168.4.0/22", "192.168.4.1"),
            route("0.0.0.0/0", "10.0.0.1"),
        ]);
        assert_eq!(
            encoded,
            [
                8, 10, 10, 1, 2, 3, //
                22, 192, 168, 4, 192, 168, 4, 1, //
                0, 10, 0, 0, 1,
            ]
        );
    }

    #[test]
    fn vendor_suboptions_carry_discovery_control_and_terminator() {
        let req = ClientRequest::from_mac("aa:bb:cc:00:11:22".parse().unwrap());
        let encoded = vendor_suboptions(&req, None);
        assert_eq!(find_suboption(&encoded, 6).unwrap(), vec![8]);
        assert_eq!(*encoded.last().unwrap(), 0xff);
        assert!(find_suboption(&encoded, 9).is_none());
    }

    #[test]
    fn vendor_suboptions_mark_raspberry_pis() {
        let req = ClientRequest::from_mac("b8:27:eb:12:34:56".parse().unwrap());
        let encoded = vendor_suboptions(&req, None);
        assert_eq!(find_suboption(&encoded, 9).unwrap(), RASPBERRY_PI_BOOT);
    }

    #[test]
    fn vendor_suboptions_carry_trace_context() {
        let tp: Traceparent = "00-23b1e307bb35484f535a1f772c06fe64-00f067aa0ba902b7-01"
            .parse()
            .unwrap();
        let req = ClientRequest::from_mac("aa:bb:cc:00:11:22".parse().unwrap());
        let encoded = vendor_suboptions(&req, Some(&tp));
        assert_eq!(find_suboption(&encoded, 69).unwrap(), tp.to_bytes());
    }
}
