/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Thin `bpf(2)` wrappers for the two objects the redirect needs: a
//! one-entry array map and a SCHED_CLS program.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use super::insn::{encode_program, Insn};
use crate::NetifError;

const BPF_MAP_CREATE: libc::c_int = 0;
const BPF_MAP_UPDATE_ELEM: libc::c_int = 2;
const BPF_PROG_LOAD: libc::c_int = 5;

const BPF_MAP_TYPE_ARRAY: u32 = 2;
const BPF_PROG_TYPE_SCHED_CLS: u32 = 3;

#[repr(C)]
struct MapCreateAttr {
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
}

#[repr(C)]
struct MapUpdateAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    value: u64,
    flags: u64,
}

#[repr(C)]
struct ProgLoadAttr {
    prog_type: u32,
    insn_cnt: u32,
    insns: u64,
    license: u64,
    log_level: u32,
    log_size: u32,
    log_buf: u64,
    kern_version: u32,
    prog_flags: u32,
}

fn bpf(cmd: libc::c_int, attr: *const libc::c_void, size: usize) -> Result<RawFd, NetifError> {
    // SAFETY: attr points at a properly sized, initialized attribute
    // struct for the given command.
    let ret = unsafe { libc::syscall(libc::SYS_bpf, cmd, attr, size as u32) };
    if ret < 0 {
        return Err(NetifError::Bpf(format!(
            "bpf cmd {cmd} failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ret as RawFd)
}

/// Create a `u32 -> u32` array map with `max_entries` slots.
pub(crate) fn create_array_map(max_entries: u32) -> Result<OwnedFd, NetifError> {
    let attr = MapCreateAttr {
        map_type: BPF_MAP_TYPE_ARRAY,
        key_size: 4,
        value_size: 4,
        max_entries,
        map_flags: 0,
    };
    let fd = bpf(
        BPF_MAP_CREATE,
        &attr as *const _ as *const libc::c_void,
        std::mem::size_of::<MapCreateAttr>(),
    )?;
    // SAFETY: the syscall returned a fresh fd we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn update_array_map(map: &OwnedFd, key: u32, value: u32) -> Result<(), NetifError> {
    let attr = MapUpdateAttr {
        map_fd: map.as_raw_fd() as u32,
        _pad: 0,
        key: &key as *const u32 as u64,
        value: &value as *const u32 as u64,
        flags: 0, // BPF_ANY
    };
    bpf(
        BPF_MAP_UPDATE_ELEM,
        &attr as *const _ as *const libc::c_void,
        std::mem::size_of::<MapUpdateAttr>(),
    )?;
    Ok(())
}

/// Load a TC classifier program. GPL-licensed: `bpf_redirect` requires it.
pub(crate) fn load_sched_cls_program(
    program: &[Insn],
    _name: &str,
) -> Result<OwnedFd, NetifError> {
    let encoded = encode_program(program);
    let license = b"GPL\0";
    let mut log_buf = vec![0u8; 64 * 1024];

    let attr = ProgLoadAttr {
        prog_type: BPF_PROG_TYPE_SCHED_CLS,
        insn_cnt: program.len() as u32,
        insns: encoded.as_ptr() as u64,
        license: license.as_ptr() as u64,
        log_level: 1,
        log_size: log_buf.len() as u32,
        log_buf: log_buf.as_mut_ptr() as u64,
        kern_version: 0,
        prog_flags: 0,
    };

    match bpf(
        BPF_PROG_LOAD,
        &attr as *const _ as *const libc::c_void,
        std::mem::size_of::<ProgLoadAttr>(),
    ) {
        // SAFETY: the syscall returned a fresh fd we now own.
        Ok(fd) => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
        Err(err) => {
            let log_end = log_buf.iter().position(|&b| b == 0).unwrap_or(0);
            let verifier = String::from_utf8_lossy(&log_buf[..log_end]);
            Err(NetifError::Bpf(format!(
                "{err}; verifier log:\n{verifier}"
            )))
        }
    }
}
