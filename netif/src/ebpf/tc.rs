/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! TC qdisc/filter attachment over raw rtnetlink messages.
//!
//! The route netlink library in use does not model TC BPF filters, so the
//! three messages involved (new qdisc, new filter, del filter) are
//! encoded by hand: nlmsghdr + tcmsg + attributes, every field
//! little-endian host order except the ethertype inside `tcm_info`.

use std::os::fd::RawFd;

use crate::NetifError;

const RTM_NEWQDISC: u16 = 36;
const RTM_NEWTFILTER: u16 = 44;
const RTM_DELTFILTER: u16 = 45;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_REPLACE: u16 = 0x0100;
const NLM_F_CREATE: u16 = 0x0400;

const NLMSG_ERROR: u16 = 2;

/// clsact qdisc handle `ffff:` and its fixed parent.
const TC_H_CLSACT_HANDLE: u32 = 0xffff_0000;
const TC_H_CLSACT: u32 = 0xffff_fff1;
/// The clsact ingress hook filters attach to.
const TC_H_MIN_INGRESS: u32 = 0xffff_fff2;

const TCA_KIND: u16 = 1;
const TCA_OPTIONS: u16 = 2;

const TCA_BPF_FD: u16 = 6;
const TCA_BPF_NAME: u16 = 7;
const TCA_BPF_FLAGS: u16 = 8;
/// direct-action: the classifier's return value is the TC verdict.
const TCA_BPF_FLAG_ACT_DIRECT: u32 = 1;

/// ETH_P_ALL in network byte order, as `tcm_info` carries it.
const ETH_P_ALL_BE: u32 = 0x0003u16.to_be() as u32;
const FILTER_PRIORITY: u32 = 1;

/// Install a clsact qdisc on `ifindex`. Present-already is fine.
pub(crate) fn add_clsact_qdisc(ifindex: i32) -> Result<(), NetifError> {
    let mut msg = tc_header(ifindex, TC_H_CLSACT_HANDLE, TC_H_CLSACT, 0);
    push_attr(&mut msg, TCA_KIND, b"clsact\0");
    transact(RTM_NEWQDISC, NLM_F_CREATE | NLM_F_REPLACE, msg)
}

/// Attach the loaded classifier to the clsact ingress hook.
pub(crate) fn attach_bpf_filter(
    ifindex: i32,
    prog_fd: RawFd,
    name: &str,
) -> Result<(), NetifError> {
    let info = (FILTER_PRIORITY << 16) | ETH_P_ALL_BE;
    let mut msg = tc_header(ifindex, 0, TC_H_MIN_INGRESS, info);
    push_attr(&mut msg, TCA_KIND, b"bpf\0");

    let mut options = Vec::new();
    push_attr(&mut options, TCA_BPF_FD, &(prog_fd as u32).to_ne_bytes());
    let mut name_z = name.as_bytes().to_vec();
    name_z.push(0);
    push_attr(&mut options, TCA_BPF_NAME, &name_z);
    push_attr(&mut options, TCA_BPF_FLAGS, &TCA_BPF_FLAG_ACT_DIRECT.to_ne_bytes());
    push_attr(&mut msg, TCA_OPTIONS, &options);

    transact(RTM_NEWTFILTER, NLM_F_CREATE | NLM_F_REPLACE, msg)
}

/// Remove the classifier from the ingress hook. Absent-already is fine.
pub(crate) fn remove_bpf_filter(ifindex: i32) -> Result<(), NetifError> {
    let info = (FILTER_PRIORITY << 16) | ETH_P_ALL_BE;
    let msg = tc_header(ifindex, 0, TC_H_MIN_INGRESS, info);
    match transact(RTM_DELTFILTER, 0, msg) {
        Ok(()) => Ok(()),
        Err(NetifError::Netlink(msg)) if msg.contains("ENOENT") => Ok(()),
        Err(err) => Err(err),
    }
}

/// tcmsg: family, pad, ifindex, handle, parent, info.
fn tc_header(ifindex: i32, handle: u32, parent: u32, info: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.push(libc::AF_UNSPEC as u8);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&ifindex.to_ne_bytes());
    out.extend_from_slice(&handle.to_ne_bytes());
    out.extend_from_slice(&parent.to_ne_bytes());
    out.extend_from_slice(&info.to_ne_bytes());
    out
}

/// Append one rtattr, padding the payload to the 4-byte boundary.
fn push_attr(buf: &mut Vec<u8>, kind: u16, payload: &[u8]) {
    let len = 4 + payload.len();
    buf.extend_from_slice(&(len as u16).to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Send one message on a fresh NETLINK_ROUTE socket and wait for the ack.
/// Blocking is fine: callers run on a dedicated namespace thread.
fn transact(msg_type: u16, extra_flags: u16, payload: Vec<u8>) -> Result<(), NetifError> {
    let mut packet = Vec::with_capacity(16 + payload.len());
    let total_len = (16 + payload.len()) as u32;
    packet.extend_from_slice(&total_len.to_ne_bytes());
    packet.extend_from_slice(&msg_type.to_ne_bytes());
    packet.extend_from_slice(&(NLM_F_REQUEST | NLM_F_ACK | extra_flags).to_ne_bytes());
    packet.extend_from_slice(&1u32.to_ne_bytes()); // seq
    packet.extend_from_slice(&0u32.to_ne_bytes()); // pid, kernel assigns
    packet.extend_from_slice(&payload);

    // SAFETY: plain socket syscalls on a fd we own for the duration.
    unsafe {
        let fd = libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_ROUTE);
        if fd < 0 {
            return Err(NetifError::Netlink(format!(
                "netlink socket: {}",
                std::io::Error::last_os_error()
            )));
        }
        let result = send_and_ack(fd, &packet);
        libc::close(fd);
        result
    }
}

unsafe fn send_and_ack(fd: RawFd, packet: &[u8]) -> Result<(), NetifError> {
    let sent = libc::send(fd, packet.as_ptr() as *const libc::c_void, packet.len(), 0);
    if sent < 0 {
        return Err(NetifError::Netlink(format!(
            "netlink send: {}",
            std::io::Error::last_os_error()
        )));
    }

    let mut buf = [0u8; 4096];
    let received = libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0);
    if received < 20 {
        return Err(NetifError::Netlink("short netlink ack".to_string()));
    }

    let msg_type = u16::from_ne_bytes([buf[4], buf[5]]);
    if msg_type != NLMSG_ERROR {
        return Ok(());
    }
    let errno = i32::from_ne_bytes([buf[16], buf[17], buf[18], buf[19]]);
    match -errno {
        0 => Ok(()),
        libc::EEXIST => Ok(()),
        libc::ENOENT => Err(NetifError::Netlink("ENOENT".to_string())),
        code => Err(NetifError::Netlink(format!(
            "netlink error: {}",
            std::io::Error::from_raw_os_error(code)
        ))),
    }
}
