/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The DHCP redirect classifier as a raw instruction sequence.

/// One BPF instruction: opcode, registers, offset, immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Insn {
    pub code: u8,
    pub dst: u8,
    pub src: u8,
    pub off: i16,
    pub imm: i32,
}

impl Insn {
    const fn new(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> Self {
        Self {
            code,
            dst,
            src,
            off,
            imm,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.code;
        out[1] = (self.src << 4) | (self.dst & 0x0f);
        out[2..4].copy_from_slice(&self.off.to_le_bytes());
        out[4..8].copy_from_slice(&self.imm.to_le_bytes());
        out
    }
}

// Opcode bytes (class | size/op | mode).
const LDX_MEM_W: u8 = 0x61;
const LDX_MEM_H: u8 = 0x69;
const LDX_MEM_B: u8 = 0x71;
const STX_MEM_W: u8 = 0x63;
const LD_IMM_DW: u8 = 0x18;
const ALU64_MOV_X: u8 = 0xbf;
const ALU64_MOV_K: u8 = 0xb7;
const ALU64_ADD_K: u8 = 0x07;
const ALU64_ADD_X: u8 = 0x0f;
const ALU64_AND_K: u8 = 0x57;
const ALU64_LSH_K: u8 = 0x67;
const JMP_JGT_X: u8 = 0x2d;
const JMP_JNE_K: u8 = 0x55;
const JMP_JEQ_K: u8 = 0x15;
const JMP_CALL: u8 = 0x85;
const JMP_EXIT: u8 = 0x95;

/// ld_imm64 source marker: immediate is a map fd.
const PSEUDO_MAP_FD: u8 = 1;

/// Helper function ids.
const FN_MAP_LOOKUP_ELEM: i32 = 1;
const FN_REDIRECT: i32 = 23;

/// `__sk_buff` field offsets.
const SKB_DATA: i16 = 76;
const SKB_DATA_END: i16 = 80;

/// Build the classifier.
///
/// Parses Ethernet → IPv4 → UDP with bounds checks against `data_end`,
/// looks up the redirect target in `map_fd`, and calls `bpf_redirect` for
/// UDP destination port 67. Everything else returns TC_ACT_OK. Multi-byte
/// packet fields read little-endian on the host, so the network-order
/// comparisons use byte-swapped immediates (0x0008 for ethertype 0x0800,
/// 0x4300 for port 67).
pub(crate) fn dhcp_redirect_program(map_fd: i32) -> Vec<Insn> {
    // Jump targets are relative: target - pc - 1. The pass label is the
    // second-to-last instruction.
    vec![
        // Packet pointers.
        Insn::new(LDX_MEM_W, 2, 1, SKB_DATA, 0), // r2 = skb->data
        Insn::new(LDX_MEM_W, 3, 1, SKB_DATA_END, 0), // r3 = skb->data_end
        // Ethernet header bounds (14 bytes).
        Insn::new(ALU64_MOV_X, 5, 2, 0, 0),
        Insn::new(ALU64_ADD_K, 5, 0, 0, 14),
        Insn::new(JMP_JGT_X, 5, 3, 31, 0), // -> pass
        // Ethertype must be IPv4.
        Insn::new(LDX_MEM_H, 6, 2, 12, 0),
        Insn::new(JMP_JNE_K, 6, 0, 29, 0x0008), // -> pass
        // IPv4 header bounds (min 20 bytes).
        Insn::new(ALU64_MOV_X, 5, 2, 0, 0),
        Insn::new(ALU64_ADD_K, 5, 0, 0, 34),
        Insn::new(JMP_JGT_X, 5, 3, 26, 0), // -> pass
        // Protocol must be UDP.
        Insn::new(LDX_MEM_B, 6, 2, 23, 0),
        Insn::new(JMP_JNE_K, 6, 0, 24, 17), // -> pass
        // IHL in 32-bit words -> byte length.
        Insn::new(LDX_MEM_B, 6, 2, 14, 0),
        Insn::new(ALU64_AND_K, 6, 0, 0, 0x0f),
        Insn::new(ALU64_LSH_K, 6, 0, 0, 2),
        // UDP header position and bounds (8 bytes).
        Insn::new(ALU64_MOV_X, 7, 2, 0, 0),
        Insn::new(ALU64_ADD_K, 7, 0, 0, 14),
        Insn::new(ALU64_ADD_X, 7, 6, 0, 0),
        Insn::new(ALU64_MOV_X, 5, 7, 0, 0),
        Insn::new(ALU64_ADD_K, 5, 0, 0, 8),
        Insn::new(JMP_JGT_X, 5, 3, 15, 0), // -> pass
        // Destination port must be 67.
        Insn::new(LDX_MEM_H, 6, 7, 2, 0),
        Insn::new(JMP_JNE_K, 6, 0, 13, 0x4300), // -> pass
        // Target ifindex lookup: key 0 in the one-entry array map.
        Insn::new(LD_IMM_DW, 1, PSEUDO_MAP_FD, 0, map_fd), // r1 = map (2 slots)
        Insn::new(0, 0, 0, 0, 0),
        Insn::new(ALU64_MOV_K, 2, 0, 0, 0),
        Insn::new(STX_MEM_W, 10, 2, -4, 0),
        Insn::new(ALU64_MOV_X, 2, 10, 0, 0),
        Insn::new(ALU64_ADD_K, 2, 0, 0, -4),
        Insn::new(JMP_CALL, 0, 0, 0, FN_MAP_LOOKUP_ELEM),
        Insn::new(JMP_JEQ_K, 0, 0, 5, 0), // -> pass
        Insn::new(LDX_MEM_W, 1, 0, 0, 0),
        Insn::new(JMP_JEQ_K, 1, 0, 3, 0), // -> pass
        // Redirect to the veth.
        Insn::new(ALU64_MOV_K, 2, 0, 0, 0),
        Insn::new(JMP_CALL, 0, 0, 0, FN_REDIRECT),
        Insn::new(JMP_EXIT, 0, 0, 0, 0),
        // pass: return TC_ACT_OK.
        Insn::new(ALU64_MOV_K, 0, 0, 0, 0),
        Insn::new(JMP_EXIT, 0, 0, 0, 0),
    ]
}

pub(crate) fn encode_program(insns: &[Insn]) -> Vec<u8> {
    let mut out = Vec::with_capacity(insns.len() * 8);
    for insn in insns {
        out.extend_from_slice(&insn.encode());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_shape() {
        let program = dhcp_redirect_program(7);
        assert_eq!(program.len(), 38);
        // Ends with exit; pass label right before it.
        assert_eq!(program[program.len() - 1].code, JMP_EXIT);
        assert_eq!(program[program.len() - 2].code, ALU64_MOV_K);
    }

    #[test]
    fn every_jump_lands_on_the_pass_label() {
        let program = dhcp_redirect_program(7);
        let pass = program.len() as i32 - 2;
        for (pc, insn) in program.iter().enumerate() {
            let class = insn.code & 0x07;
            if class == 0x05 && insn.code != JMP_CALL && insn.code != JMP_EXIT {
                let target = pc as i32 + 1 + i32::from(insn.off);
                assert_eq!(target, pass, "jump at {pc} must land on pass");
            }
        }
    }

    #[test]
    fn map_fd_rides_in_the_ld_imm64_slot() {
        let program = dhcp_redirect_program(42);
        let ld = program
            .iter()
            .find(|insn| insn.code == LD_IMM_DW)
            .expect("ld_imm64 present");
        assert_eq!(ld.imm, 42);
        assert_eq!(ld.src, PSEUDO_MAP_FD);
    }

    #[test]
    fn instruction_encoding_is_8_bytes_little_endian() {
        let insn = Insn::new(LDX_MEM_W, 2, 1, 76, 0);
        let bytes = insn.encode();
        assert_eq!(bytes, [0x61, 0x12, 76, 0, 0, 0, 0, 0]);

        let neg = Insn::new(STX_MEM_W, 10, 2, -4, 0);
        assert_eq!(neg.encode()[2..4], (-4i16).to_le_bytes());
    }

    #[test]
    fn encoded_program_length() {
        let program = dhcp_redirect_program(7);
        assert_eq!(encode_program(&program).len(), program.len() * 8);
    }
}
