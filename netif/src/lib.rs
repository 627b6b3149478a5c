/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! DHCP proxy interface management.
//!
//! In proxy mode the process needs a Layer-2 attachment to the host
//! network to see broadcast DHCP packets from inside its own network
//! namespace. Three mutually exclusive strategies provide one: a macvlan
//! child of the host's default-gateway interface, an ipvlan L2 child
//! (plus a broadcast workaround), or a veth pair fed by an eBPF TC
//! classifier that redirects UDP port 67 traffic. A Kubernetes
//! Lease-based elector gates interface ownership to a single pod.

mod ebpf;
mod leader;
mod manager;
mod ns;
mod privileges;

pub use ebpf::EbpfManager;
pub use leader::{LeaderConfig, LeaderElector};
pub use manager::{InterfaceKind, NetworkManager};
pub use privileges::check_network_privileges;

use async_trait::async_trait;

/// Address assigned to the created interface. Host scope; it only exists
/// so the kernel will deliver broadcast DHCP to the bound socket.
pub const DHCP_IF_ADDR: std::net::Ipv4Addr = std::net::Ipv4Addr::new(127, 1, 1, 1);

#[derive(Debug, thiserror::Error)]
pub enum NetifError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("network namespace error: {0}")]
    Namespace(String),

    #[error("no default gateway interface found")]
    NoDefaultGateway,

    #[error("interface {0} not found")]
    LinkNotFound(String),

    #[error("bpf error: {0}")]
    Bpf(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("missing privileges:\n{0}")]
    MissingPrivileges(String),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl From<rtnetlink::Error> for NetifError {
    fn from(err: rtnetlink::Error) -> Self {
        NetifError::Netlink(err.to_string())
    }
}

/// Lifecycle of one DHCP proxy attachment. `setup` must be idempotent
/// against stale interfaces from a previous holder; `cleanup` must be
/// idempotent against an attachment that was never created.
#[async_trait]
pub trait InterfaceManager: Send + Sync {
    async fn setup(&self) -> Result<(), NetifError>;
    async fn cleanup(&self) -> Result<(), NetifError>;
}
