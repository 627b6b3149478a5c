/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::Write as _;
use std::str::FromStr;

use mac_address::MacAddress;

/// Format used when injecting a MAC address as a URL path segment.
///
/// Applied uniformly to the HTTP and TFTP bootfile forms so a single
/// deployment option controls both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MacFormat {
    /// `40:15:ff:89:cc:0e`
    #[default]
    Colon,
    /// `40-15-ff-89-cc-0e`
    Dash,
    /// `4015.ff89.cc0e`
    Dot,
    /// `4015ff89cc0e`
    NoDelimiter,
    /// No MAC segment at all.
    None,
}

impl MacFormat {
    /// Render `mac` in this format; `None` yields no segment.
    pub fn segment(self, mac: MacAddress) -> Option<String> {
        let b = mac.bytes();
        match self {
            Self::Colon => Some(join(&b, ":", 1)),
            Self::Dash => Some(join(&b, "-", 1)),
            Self::Dot => Some(join(&b, ".", 2)),
            Self::NoDelimiter => Some(join(&b, "", 1)),
            Self::None => None,
        }
    }
}

fn join(bytes: &[u8; 6], sep: &str, group: usize) -> String {
    let mut out = String::with_capacity(17);
    for (i, chunk) in bytes.chunks(group).enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        for b in chunk {
            let _ = write!(out, "{b:02x}");
        }
    }
    out
}

impl FromStr for MacFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "colon" => Ok(Self::Colon),
            "dash" => Ok(Self::Dash),
            "dot" => Ok(Self::Dot),
            "no-delimiter" => Ok(Self::NoDelimiter),
            "none" | "empty" => Ok(Self::None),
            other => Err(format!(
                "invalid mac format {other:?}, must be one of [colon, dash, dot, no-delimiter, none]"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "40:15:ff:89:cc:0e".parse().unwrap()
    }

    #[test]
    fn formats() {
        assert_eq!(MacFormat::Colon.segment(mac()).unwrap(), "40:15:ff:89:cc:0e");
        assert_eq!(MacFormat::Dash.segment(mac()).unwrap(), "40-15-ff-89-cc-0e");
        assert_eq!(MacFormat::Dot.segment(mac()).unwrap(), "4015.ff89.cc0e");
        assert_eq!(MacFormat::NoDelimiter.segment(mac()).unwrap(), "4015ff89cc0e");
        assert_eq!(MacFormat::None.segment(mac()), None);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("swirl".parse::<MacFormat>().is_err());
        assert_eq!("dash".parse::<MacFormat>().unwrap(), MacFormat::Dash);
    }
}
