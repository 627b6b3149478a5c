/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::{self, Display, Formatter};

use mac_address::MacAddress;

// Node types.
const TYPE_MESSAGING: u8 = 0x03;
const TYPE_END: u8 = 0x7f;

// Messaging sub-types.
const SUBTYPE_MAC: u8 = 0x0b;
const SUBTYPE_IPV4: u8 = 0x0c;
const SUBTYPE_END: u8 = 0xff;

/// One device path node: type, sub-type, and payload (length is implied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePathNode {
    pub node_type: u8,
    pub sub_type: u8,
    pub data: Vec<u8>,
}

impl DevicePathNode {
    /// MAC address node: 32 bytes of padded address plus the interface
    /// type byte (1 = Ethernet).
    pub fn mac(mac: MacAddress) -> Self {
        let mut data = vec![0u8; 33];
        data[..6].copy_from_slice(&mac.bytes());
        data[32] = 0x01;
        Self {
            node_type: TYPE_MESSAGING,
            sub_type: SUBTYPE_MAC,
            data,
        }
    }

    /// IPv4 node with all-zero fields: address comes from DHCP.
    pub fn ipv4() -> Self {
        Self {
            node_type: TYPE_MESSAGING,
            sub_type: SUBTYPE_IPV4,
            data: vec![0u8; 23],
        }
    }

    fn size(&self) -> usize {
        4 + self.data.len()
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.node_type);
        out.push(self.sub_type);
        out.extend_from_slice(&(self.size() as u16).to_le_bytes());
        out.extend_from_slice(&self.data);
    }
}

impl Display for DevicePathNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.node_type, self.sub_type) {
            (TYPE_MESSAGING, SUBTYPE_MAC) if self.data.len() >= 6 => {
                write!(
                    f,
                    "MAC({:02x}{:02x}{:02x}{:02x}{:02x}{:02x},0x1)",
                    self.data[0], self.data[1], self.data[2], self.data[3], self.data[4],
                    self.data[5]
                )
            }
            (TYPE_MESSAGING, SUBTYPE_IPV4) => write!(f, "IPv4()"),
            (t, s) => write!(f, "Path({t:#04x},{s:#04x})"),
        }
    }
}

/// An EFI device path: a sequence of nodes terminated on the wire by an
/// end node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePath {
    pub nodes: Vec<DevicePathNode>,
}

impl DevicePath {
    /// The PXE-over-IPv4 path for one NIC: `MAC(...)/IPv4()`.
    pub fn pxe_ipv4(mac: MacAddress) -> Self {
        Self {
            nodes: vec![DevicePathNode::mac(mac), DevicePathNode::ipv4()],
        }
    }

    /// Parse a device path of `total` bytes, including the end node.
    pub fn parse(data: &[u8]) -> Self {
        let mut nodes = Vec::new();
        let mut pos = 0;
        while pos + 4 <= data.len() {
            let node_type = data[pos];
            let sub_type = data[pos + 1];
            let size = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
            if size < 4 || pos + size > data.len() {
                break;
            }
            if node_type == TYPE_END && sub_type == SUBTYPE_END {
                break;
            }
            nodes.push(DevicePathNode {
                node_type,
                sub_type,
                data: data[pos + 4..pos + size].to_vec(),
            });
            pos += size;
        }
        Self { nodes }
    }

    /// Wire form, end node included.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.write_to(&mut out);
        }
        out.extend_from_slice(&[TYPE_END, SUBTYPE_END, 0x04, 0x00]);
        out
    }

    /// The MAC address from the first MAC node, if any.
    pub fn mac(&self) -> Option<MacAddress> {
        self.nodes.iter().find_map(|n| {
            if n.node_type == TYPE_MESSAGING && n.sub_type == SUBTYPE_MAC && n.data.len() >= 6 {
                let bytes: [u8; 6] = n.data[..6].try_into().ok()?;
                Some(MacAddress::new(bytes))
            } else {
                None
            }
        })
    }
}

impl Display for DevicePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "b8:27:eb:12:34:56".parse().unwrap()
    }

    #[test]
    fn pxe_path_round_trip() {
        let path = DevicePath::pxe_ipv4(mac());
        let wire = path.bytes();
        // MAC node (4+33) + IPv4 node (4+23) + end node (4).
        assert_eq!(wire.len(), 37 + 27 + 4);

        let parsed = DevicePath::parse(&wire);
        assert_eq!(parsed, path);
        assert_eq!(parsed.mac(), Some(mac()));
    }

    #[test]
    fn display_is_readable() {
        let path = DevicePath::pxe_ipv4(mac());
        assert_eq!(path.to_string(), "MAC(b827eb123456,0x1)/IPv4()");
    }

    #[test]
    fn parse_tolerates_truncation() {
        let wire = DevicePath::pxe_ipv4(mac()).bytes();
        let parsed = DevicePath::parse(&wire[..10]);
        assert!(parsed.nodes.is_empty());
    }
}
