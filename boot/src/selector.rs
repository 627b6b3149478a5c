/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use anvil_backend::NetbootData;
use url::Url;

use crate::client::ClientRequest;
use crate::mac_format::MacFormat;
use crate::trace::Traceparent;

/// Bootfile denied marker sent to clients whose record forbids netboot.
pub const NETBOOT_NOT_ALLOWED: &str = "/netboot-not-allowed";

/// Deployment-wide inputs to boot artifact selection.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// TFTP server address advertised in option 66 / siaddr.
    pub tftp_addr: SocketAddrV4,
    /// Base URL of the HTTP iPXE binary endpoint, e.g.
    /// `http://192.0.2.4:7171/ipxe/binary/`.
    pub http_binary_url: Url,
    /// URL of the generated iPXE script, e.g.
    /// `http://192.0.2.4:7171/ipxe/script/auto.ipxe`.
    pub ipxe_script_url: Url,
    /// Format for the MAC path segment injected into bootfile URLs.
    pub inject_mac: MacFormat,
    /// Extra user class treated like `iPXE`.
    pub custom_user_class: Option<String>,
    /// Per-deployment overrides of the IANA arch to binary table, keyed by
    /// arch code.
    pub arch_overrides: HashMap<u16, String>,
}

/// The `(next-server, bootfile)` pair a client is steered to.
///
/// This is the value DHCP option 66/67 construction, the TFTP bootfile
/// lookup, and the HTTP script URL must all agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub next_server: Ipv4Addr,
    pub bootfile: String,
}

impl Selection {
    /// True when no netboot options should be attached to the reply at all.
    pub fn is_empty(&self) -> bool {
        self.bootfile.is_empty()
    }
}

/// Pure mapping from client hints to a [`Selection`].
#[derive(Debug, Clone)]
pub struct Selector {
    config: SelectorConfig,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Resolve the iPXE binary name for a request: hardware override, then
    /// deployment override, then the default arch table.
    pub fn binary_for(&self, req: &ClientRequest, netboot: &NetbootData) -> String {
        if let Some(name) = netboot.ipxe_binary.as_deref() {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let arch = req.effective_arch();
        if let Some(name) = self.config.arch_overrides.get(&arch.code()) {
            return name.clone();
        }
        arch.default_binary().to_string()
    }

    /// Select the next-server and bootfile for one client request.
    ///
    /// User class wins over vendor class wins over the arch default: a
    /// client already running iPXE is chained to the script URL, an
    /// HTTPClient is pointed at the HTTP binary endpoint, everyone else
    /// gets a bare TFTP bootfile.
    pub fn select(
        &self,
        req: &ClientRequest,
        netboot: &NetbootData,
        trace: Option<&Traceparent>,
    ) -> Selection {
        let arch = req.effective_arch();

        if !netboot.allow_netboot {
            let bootfile = if arch.is_uboot() {
                String::new()
            } else {
                NETBOOT_NOT_ALLOWED.to_string()
            };
            return Selection {
                next_server: Ipv4Addr::UNSPECIFIED,
                bootfile,
            };
        }

        let mut binary = self.binary_for(req, netboot);
        if binary.is_empty() {
            // No binary for this architecture: no netboot options at all.
            return Selection {
                next_server: Ipv4Addr::UNSPECIFIED,
                bootfile: String::new(),
            };
        }
        if let Some(tp) = trace {
            binary = format!("{binary}-{tp}");
        }

        if req.is_ipxe(self.config.custom_user_class.as_deref()) {
            let url = netboot
                .ipxe_script_url
                .clone()
                .unwrap_or_else(|| self.script_url_for(req.mac));
            return Selection {
                next_server: self.http_host(),
                bootfile: url.to_string(),
            };
        }

        if req.is_http_client() {
            let mut url = self.config.http_binary_url.clone();
            append_segments(&mut url, self.config.inject_mac.segment(req.mac), &binary);
            return Selection {
                next_server: self.http_host(),
                bootfile: url.to_string(),
            };
        }

        let bootfile = match self.config.inject_mac.segment(req.mac) {
            Some(seg) => format!("{seg}/{binary}"),
            None => binary,
        };
        Selection {
            next_server: *self.config.tftp_addr.ip(),
            bootfile,
        }
    }

    /// The iPXE script URL for one MAC, with the MAC injected as the
    /// second-to-last path segment when injection is enabled.
    pub fn script_url_for(&self, mac: mac_address::MacAddress) -> Url {
        let mut url = self.config.ipxe_script_url.clone();
        let Some(seg) = self.config.inject_mac.segment(mac) else {
            return url;
        };

        let mut segments: Vec<String> = match url.path_segments() {
            Some(parts) => parts.map(str::to_string).collect(),
            None => return url,
        };
        let Some(file) = segments.pop() else {
            return url;
        };
        segments.push(seg);
        segments.push(file);
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear();
            for s in &segments {
                path.push(s);
            }
        }
        url
    }

    /// Next-server value for HTTP clients. Advisory only, but kept
    /// consistent with the binary URL host.
    fn http_host(&self) -> Ipv4Addr {
        self.config
            .http_binary_url
            .host_str()
            .and_then(|h| h.parse().ok())
            .unwrap_or(*self.config.tftp_addr.ip())
    }
}

fn append_segments(url: &mut Url, mac_segment: Option<String>, binary: &str) {
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        if let Some(seg) = mac_segment {
            path.push(&seg);
        }
        path.push(binary);
    }
}
