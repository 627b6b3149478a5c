/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! In-place script patching of embedded iPXE binaries.
//!
//! The ROMs are built with a 512-byte placeholder region compiled in. At
//! serve time the configured script snippet is spliced over the start of
//! that region and the remainder is NUL-padded, which iPXE reads as an
//! embedded script ending at the first NUL.

use crate::BootError;

/// The placeholder baked into the iPXE build. Must match the embed file
/// used when the ROMs under `embedded/` were produced.
pub const PATCH_MAGIC: &[u8; 512] = b"661ojr6t7ol2eygyqeavmci27lvgpkcrwus7jnps3izdmpppgwpkd5410bdiez2iyw0ov6vr37cw3uwg72ni9at0fsz0wu884mtls4n5auwqax2exhq9yfd133np7bcqawdp8gmbubifgr60h4efv1zk0drcq0ii5xnire4k3yb0hu3ylo2n5o5fy9hj3oa9b056yomj2ux32pyyxkxgcch1oaicz4frbfykxoxzjv1iubg93caajy2yy3iuw1hoz2yuzzrcsc817qmmhcpdjwhixmrg3q9wyt197copju4nbs6qpvjj8erkp72nw6r6na0ur81v5ssy2t9bocdruuj329ifdih3y0qy3b362vqhitu0c4ucqg2ollszrpe26hssabl83t5krno10e233mwsyby8cvbgatf0pobhrdxqb11or8u09dyo44l55ea8407evk54q7n5dw3h6qvbnumdim09x6nkto6z23xpwzfxorvudpqg3eulhi41rp7d";

/// Splice `script` over the placeholder region of `binary`.
///
/// Deterministic and idempotent: a binary whose placeholder was already
/// replaced is returned unchanged, so patching twice with the same script
/// equals patching once. Fails only when the script exceeds the region.
pub fn patch(binary: &[u8], script: &[u8]) -> Result<Vec<u8>, BootError> {
    if script.is_empty() {
        return Ok(binary.to_vec());
    }
    if script.len() > PATCH_MAGIC.len() {
        return Err(BootError::PatchTooLong {
            got: script.len(),
            max: PATCH_MAGIC.len(),
        });
    }

    let Some(offset) = find(binary, PATCH_MAGIC) else {
        return Ok(binary.to_vec());
    };

    let mut out = binary.to_vec();
    let window = &mut out[offset..offset + PATCH_MAGIC.len()];
    window[..script.len()].copy_from_slice(script);
    window[script.len()..].fill(0);
    Ok(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_with_window() -> Vec<u8> {
        let mut bin = vec![0xeau8; 64];
        bin.extend_from_slice(PATCH_MAGIC);
        bin.extend_from_slice(&[0x55u8; 32]);
        bin
    }

    #[test]
    fn patch_replaces_prefix_and_nul_pads() {
        let bin = binary_with_window();
        let script = b"#!ipxe\nchain http://192.0.2.4/auto.ipxe\n";

        let out = patch(&bin, script).unwrap();
        assert_eq!(out.len(), bin.len());
        assert_eq!(&out[..64], &bin[..64]);
        assert_eq!(&out[64..64 + script.len()], script);
        assert!(out[64 + script.len()..64 + 512].iter().all(|&b| b == 0));
        assert_eq!(&out[64 + 512..], &bin[64 + 512..]);
    }

    #[test]
    fn patch_is_idempotent() {
        let bin = binary_with_window();
        let script = b"#!ipxe\nautoboot\n";

        let once = patch(&bin, script).unwrap();
        let twice = patch(&once, script).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn oversized_patch_fails_cleanly() {
        let bin = binary_with_window();
        let script = vec![b'a'; 513];

        let err = patch(&bin, &script).unwrap_err();
        assert!(matches!(err, BootError::PatchTooLong { got: 513, max: 512 }));
        // Input untouched on failure.
        assert_eq!(bin, binary_with_window());
    }

    #[test]
    fn binary_without_window_is_unmodified() {
        let bin = vec![0x12u8; 1024];
        let out = patch(&bin, b"#!ipxe\n").unwrap();
        assert_eq!(out, bin);
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let bin = binary_with_window();
        assert_eq!(patch(&bin, b"").unwrap(), bin);
    }

    #[test]
    fn full_width_patch_fills_window() {
        let bin = binary_with_window();
        let script = vec![b'x'; 512];
        let out = patch(&bin, &script).unwrap();
        assert_eq!(&out[64..64 + 512], script.as_slice());
    }
}
