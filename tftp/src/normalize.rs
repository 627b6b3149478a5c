/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Request filename normalization.
//!
//! Raspberry Pi firmware prepends its serial number or MAC to every TFTP
//! request (`b827eb123456//RPI_EFI.fd`), other clients may carry a MAC
//! path segment injected by the DHCP selector, and any client may append
//! a traceparent to the filename. All three are peeled off here so the
//! mux dispatches on the cleaned name.

use anvil_boot::{extract_traceparent_from_filename, Traceparent};
use mac_address::MacAddress;
use once_cell::sync::Lazy;
use regex::Regex;

/// Pi netboot prefix: an 8-12 hex digit serial or a dash-separated MAC,
/// followed by the real filename (sometimes behind a double slash).
static RPI_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{8,12}|[0-9a-fA-F]{2}(-[0-9a-fA-F]{2}){5})//?(.+)$")
        .expect("rpi prefix pattern compiles")
});

/// A normalized TFTP read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    /// Cleaned filename the mux dispatches on.
    pub filename: String,
    /// The raw filename as received.
    pub raw: String,
    /// Client MAC recovered from the path, when one was present.
    pub mac: Option<MacAddress>,
    /// Whether the request carried a Raspberry Pi serial/MAC prefix.
    pub rpi_prefixed: bool,
    /// Trace context recovered from the filename suffix.
    pub trace: Option<Traceparent>,
}

pub fn normalize(raw: &str) -> TftpRequest {
    let trimmed = raw.trim_start_matches('/');
    let (without_trace, trace) = extract_traceparent_from_filename(trimmed);

    let mut filename = without_trace.to_string();
    let mut mac = None;
    let mut rpi_prefixed = false;

    if let Some(caps) = RPI_PREFIX.captures(&filename) {
        let ident = caps.get(1).map(|m| m.as_str().to_string());
        let rest = caps.get(3).map(|m| m.as_str().to_string());
        if let (Some(ident), Some(rest)) = (ident, rest) {
            mac = mac_from_identifier(&ident);
            rpi_prefixed = true;
            filename = rest;
        }
    } else if let Some((first, rest)) = filename.split_once('/') {
        // A MAC directory segment injected by the selector.
        if let Some(parsed) = parse_mac(first) {
            mac = Some(parsed);
            filename = rest.to_string();
        }
    }

    TftpRequest {
        filename,
        raw: raw.to_string(),
        mac,
        rpi_prefixed,
        trace,
    }
}

/// Map a Pi identifier to a MAC: a 12-hex-digit serial is the MAC itself,
/// a dashed identifier parses directly. Shorter serials carry no MAC.
fn mac_from_identifier(ident: &str) -> Option<MacAddress> {
    if ident.len() == 12 && !ident.contains('-') {
        let mut bytes = [0u8; 6];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&ident[i * 2..i * 2 + 2], 16).ok()?;
        }
        return Some(MacAddress::new(bytes));
    }
    parse_mac(ident)
}

fn parse_mac(s: &str) -> Option<MacAddress> {
    s.replace('-', ":").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pi_serial_prefix_is_stripped_and_mapped_to_mac() {
        let req = normalize("b827eb123456//RPI_EFI.fd");
        assert_eq!(req.filename, "RPI_EFI.fd");
        assert!(req.rpi_prefixed);
        assert_eq!(req.mac, Some("b8:27:eb:12:34:56".parse().unwrap()));
    }

    #[test]
    fn pi_dashed_mac_prefix_is_stripped() {
        let req = normalize("b8-27-eb-12-34-56/config.txt");
        assert_eq!(req.filename, "config.txt");
        assert!(req.rpi_prefixed);
        assert_eq!(req.mac, Some("b8:27:eb:12:34:56".parse().unwrap()));
    }

    #[test]
    fn short_serial_has_no_mac() {
        let req = normalize("1a2b3c4d/start4.elf");
        assert_eq!(req.filename, "start4.elf");
        assert!(req.rpi_prefixed);
        assert!(req.mac.is_none());
    }

    #[test]
    fn nested_pi_paths_survive() {
        let req = normalize("b827eb123456/overlays/vc4-kms-v3d.dtbo");
        assert_eq!(req.filename, "overlays/vc4-kms-v3d.dtbo");
    }

    #[test]
    fn selector_mac_segment_is_recognized() {
        let req = normalize("aa:bb:cc:00:11:22/snp.efi");
        assert_eq!(req.filename, "snp.efi");
        assert!(!req.rpi_prefixed);
        assert_eq!(req.mac, Some("aa:bb:cc:00:11:22".parse().unwrap()));
    }

    #[test]
    fn traceparent_suffix_is_extracted_before_dispatch() {
        let req = normalize("undionly.kpxe-00-23b1e307bb35484f535a1f772c06fe64-00f067aa0ba902b7-01");
        assert_eq!(req.filename, "undionly.kpxe");
        assert!(req.trace.unwrap().sampled());
    }

    #[test]
    fn plain_names_pass_through() {
        let req = normalize("vmlinuz-x86_64");
        assert_eq!(req.filename, "vmlinuz-x86_64");
        assert!(req.mac.is_none());
        assert!(!req.rpi_prefixed);
        assert!(req.trace.is_none());
    }

    #[test]
    fn pxelinux_paths_are_not_mistaken_for_mac_segments() {
        let req = normalize("pxelinux.cfg/01-aa-bb-cc-00-11-22");
        assert_eq!(req.filename, "pxelinux.cfg/01-aa-bb-cc-00-11-22");
        assert!(req.mac.is_none());
    }
}
