/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use mac_address::MacAddress;

use crate::arch::{self, ClientArch};
use crate::vendor_class::VendorClass;

/// User class value identifying a client already running iPXE.
pub const IPXE_USER_CLASS: &str = "iPXE";

/// Boot-relevant snapshot of one received DHCP packet.
///
/// Constructed per packet (or synthesized from a bare MAC for TFTP/HTTP
/// requests), immutable, and discarded after the reply is sent.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub mac: MacAddress,
    /// IANA architecture from option 93, when present.
    pub arch: Option<ClientArch>,
    /// Raw user class (option 77).
    pub user_class: Option<String>,
    /// Raw vendor class identifier (option 60).
    pub vendor_class_id: Option<String>,
    /// Client machine identifier GUID (option 97), passed through verbatim.
    pub client_machine_id: Option<Vec<u8>>,
    pub xid: Option<u32>,
}

impl ClientRequest {
    /// A request synthesized from a bare MAC, for lookups that arrive over
    /// TFTP or HTTP rather than DHCP.
    pub fn from_mac(mac: MacAddress) -> Self {
        Self {
            mac,
            arch: None,
            user_class: None,
            vendor_class_id: None,
            client_machine_id: None,
            xid: None,
        }
    }

    /// Parsed vendor class, when option 60 carries a well-formed one.
    pub fn vendor_class(&self) -> Option<VendorClass> {
        self.vendor_class_id.as_deref()?.parse().ok()
    }

    /// True when the client is already running iPXE: user class `iPXE` or
    /// the deployment's custom class.
    pub fn is_ipxe(&self, custom_user_class: Option<&str>) -> bool {
        match self.user_class.as_deref() {
            Some(uc) => uc == IPXE_USER_CLASS || Some(uc) == custom_user_class,
            None => false,
        }
    }

    /// True when the vendor class advertises UEFI HTTP boot.
    pub fn is_http_client(&self) -> bool {
        self.vendor_class_id
            .as_deref()
            .is_some_and(|vc| vc.starts_with("HTTPClient"))
    }

    /// True when the vendor class advertises PXE boot.
    pub fn is_pxe_client(&self) -> bool {
        self.vendor_class_id
            .as_deref()
            .is_some_and(|vc| vc.starts_with("PXEClient"))
    }

    pub fn is_raspberry_pi(&self) -> bool {
        arch::is_raspberry_pi(self.mac)
    }

    /// Effective architecture: option 93 when sent, otherwise option 60's
    /// arch field, with ambiguous Raspberry Pi requests resolved to 64-bit
    /// ARM by OUI.
    pub fn effective_arch(&self) -> ClientArch {
        if let Some(arch) = self.arch {
            return self.disambiguate(arch);
        }
        if let Some(vc) = self.vendor_class() {
            return self.disambiguate(vc.arch);
        }
        if self.is_raspberry_pi() {
            return ClientArch::EfiArm64;
        }
        ClientArch::X86Bios
    }

    fn disambiguate(&self, arch: ClientArch) -> ClientArch {
        if matches!(arch, ClientArch::Other(_)) && self.is_raspberry_pi() {
            ClientArch::EfiArm64
        } else {
            arch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mac: &str) -> ClientRequest {
        ClientRequest::from_mac(mac.parse().unwrap())
    }

    #[test]
    fn ipxe_user_class_matches() {
        let mut req = request("aa:bb:cc:00:11:22");
        req.user_class = Some("iPXE".to_string());
        assert!(req.is_ipxe(None));
        assert!(req.is_ipxe(Some("fleet")));
    }

    #[test]
    fn custom_user_class_matches() {
        let mut req = request("aa:bb:cc:00:11:22");
        req.user_class = Some("fleet".to_string());
        assert!(!req.is_ipxe(None));
        assert!(req.is_ipxe(Some("fleet")));
    }

    #[test]
    fn http_client_prefix() {
        let mut req = request("aa:bb:cc:00:11:22");
        req.vendor_class_id = Some("HTTPClient:Arch:00016:UNDI:003001".to_string());
        assert!(req.is_http_client());
        assert!(!req.is_pxe_client());
    }

    #[test]
    fn pi_without_arch_is_arm64() {
        let req = request("b8:27:eb:12:34:56");
        assert_eq!(req.effective_arch(), ClientArch::EfiArm64);
    }

    #[test]
    fn arch_option_wins_over_vendor_class() {
        let mut req = request("aa:bb:cc:00:11:22");
        req.arch = Some(ClientArch::EfiX64);
        req.vendor_class_id = Some("PXEClient:Arch:00000:UNDI:003001".to_string());
        assert_eq!(req.effective_arch(), ClientArch::EfiX64);
    }
}
