/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A W3C `traceparent` value.
///
/// Trace context travels in three unusual places here: appended to TFTP
/// filenames, inside DHCP option 43 sub-option 69, and as a kernel argument
/// in generated boot scripts. This type is the parsed form all three share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traceparent {
    pub version: u8,
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub flags: u8,
}

impl Traceparent {
    /// True when the sampled flag is set; unsampled context is carried but
    /// never written into boot scripts.
    pub fn sampled(&self) -> bool {
        self.flags & 0x01 != 0
    }

    /// Binary form carried in DHCP option 43 sub-option 69.
    pub fn to_bytes(&self) -> [u8; 26] {
        let mut out = [0u8; 26];
        out[0] = self.version;
        out[1..17].copy_from_slice(&self.trace_id);
        out[17..25].copy_from_slice(&self.span_id);
        out[25] = self.flags;
        out
    }

    pub fn trace_id_hex(&self) -> String {
        hex_lower(&self.trace_id)
    }
}

impl Display for Traceparent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}-{}-{}-{:02x}",
            self.version,
            hex_lower(&self.trace_id),
            hex_lower(&self.span_id),
            self.flags
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid traceparent: {0}")]
pub struct TraceparentParseError(String);

impl FromStr for Traceparent {
    type Err = TraceparentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 4 || parts[0].len() != 2 || parts[1].len() != 32 || parts[2].len() != 16 || parts[3].len() != 2
        {
            return Err(TraceparentParseError(s.to_string()));
        }

        let version =
            u8::from_str_radix(parts[0], 16).map_err(|_| TraceparentParseError(s.to_string()))?;
        let flags =
            u8::from_str_radix(parts[3], 16).map_err(|_| TraceparentParseError(s.to_string()))?;

        let mut trace_id = [0u8; 16];
        parse_hex(parts[1], &mut trace_id).map_err(|_| TraceparentParseError(s.to_string()))?;
        let mut span_id = [0u8; 8];
        parse_hex(parts[2], &mut span_id).map_err(|_| TraceparentParseError(s.to_string()))?;

        // All-zero trace or span ids are invalid per the W3C spec.
        if trace_id == [0u8; 16] || span_id == [0u8; 8] {
            return Err(TraceparentParseError(s.to_string()));
        }

        Ok(Traceparent {
            version,
            trace_id,
            span_id,
            flags,
        })
    }
}

fn parse_hex(s: &str, out: &mut [u8]) -> Result<(), ()> {
    for (i, chunk) in out.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ())?;
    }
    Ok(())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Splits a trailing `-<traceparent>` suffix off a TFTP filename.
///
/// Clients propagate trace context over TFTP by appending the traceparent
/// string to the filename they really want. Returns the cleaned filename
/// and the parsed context, or the input untouched when no valid suffix is
/// present.
pub fn extract_traceparent_from_filename(filename: &str) -> (&str, Option<Traceparent>) {
    // A traceparent suffix is fixed-width: '-' + 2 + 1 + 32 + 1 + 16 + 1 + 2.
    const SUFFIX_LEN: usize = 56;
    if filename.len() <= SUFFIX_LEN {
        return (filename, None);
    }
    let split = filename.len() - SUFFIX_LEN;
    if !filename.is_char_boundary(split) || filename.as_bytes()[split] != b'-' {
        return (filename, None);
    }
    match filename[split + 1..].parse::<Traceparent>() {
        Ok(tp) => (&filename[..split], Some(tp)),
        Err(_) => (filename, None),
    }
}
