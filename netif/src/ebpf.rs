/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! eBPF TC redirect attachment.
//!
//! A veth pair carries DHCP into the container namespace: the host-side
//! end receives packets redirected by a TC ingress classifier on the
//! host's default-gateway interface. The classifier parses Ethernet →
//! IPv4 → UDP and redirects UDP destination port 67 to the veth; all
//! other traffic passes. The program is emitted directly as an
//! instruction sequence, so no compiler is involved at runtime; the
//! target ifindex is supplied through a one-entry array map.

mod insn;
mod sys;
mod tc;

use std::os::fd::{AsRawFd, OwnedFd};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::manager::{delete_if_present, link_index, spawn_connection};
use crate::ns;
use crate::{InterfaceManager, NetifError, DHCP_IF_ADDR};

const CONTAINER_VETH: &str = "ebpf0";
const HOST_VETH: &str = "ebpf0-host";
const PROGRAM_NAME: &str = "dhcp_redirect";

/// RT_SCOPE_HOST, as in the macvlan/ipvlan path.
const RT_SCOPE_HOST: u8 = 254;

pub struct EbpfManager {
    /// Loaded program and map, kept alive while attached.
    loaded: Mutex<Option<Loaded>>,
}

struct Loaded {
    _prog: OwnedFd,
    _target_map: OwnedFd,
}

impl EbpfManager {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(None),
        }
    }

    async fn create_veth_pair(&self) -> Result<(), NetifError> {
        let container_ns = ns::open_ns(ns::SELF_NS_PATH)?;
        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;

        ns::in_namespace(host_ns, move || async move {
            let handle = spawn_connection()?;
            handle
                .link()
                .add()
                .veth(HOST_VETH.to_string(), CONTAINER_VETH.to_string())
                .execute()
                .await?;

            let index = link_index(&handle, CONTAINER_VETH)
                .await?
                .ok_or_else(|| NetifError::LinkNotFound(CONTAINER_VETH.to_string()))?;
            handle
                .link()
                .set(index)
                .setns_by_fd(container_ns.as_raw_fd())
                .execute()
                .await?;

            let host_index = link_index(&handle, HOST_VETH)
                .await?
                .ok_or_else(|| NetifError::LinkNotFound(HOST_VETH.to_string()))?;
            handle.link().set(host_index).up().execute().await?;
            Ok(())
        })
        .await
    }

    async fn configure_container_veth(&self) -> Result<(), NetifError> {
        let handle = spawn_connection()?;
        let index = link_index(&handle, CONTAINER_VETH)
            .await?
            .ok_or_else(|| NetifError::LinkNotFound(CONTAINER_VETH.to_string()))?;

        handle.link().set(index).up().execute().await?;
        let mut req = handle
            .address()
            .add(index, std::net::IpAddr::V4(DHCP_IF_ADDR), 32);
        req.message_mut().header.scope =
            netlink_packet_route::address::AddressScope::Other(RT_SCOPE_HOST);
        match req.execute().await {
            Ok(()) => Ok(()),
            Err(err) if crate::manager::is_exists(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Load the map and program, then attach the classifier to the host's
    /// default-gateway interface.
    async fn load_and_attach(&self) -> Result<(), NetifError> {
        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;

        let loaded = ns::in_namespace(host_ns, || async {
            let handle = spawn_connection()?;
            let src_index = crate::manager::default_gateway_ifindex(&handle).await?;
            let host_veth_index = link_index(&handle, HOST_VETH)
                .await?
                .ok_or_else(|| NetifError::LinkNotFound(HOST_VETH.to_string()))?;

            // One-entry array map holding the redirect target ifindex.
            let target_map = sys::create_array_map(1)?;
            sys::update_array_map(&target_map, 0, host_veth_index)?;

            let program = insn::dhcp_redirect_program(target_map.as_raw_fd());
            let prog = sys::load_sched_cls_program(&program, PROGRAM_NAME)?;

            tc::add_clsact_qdisc(src_index as i32)?;
            tc::attach_bpf_filter(src_index as i32, prog.as_raw_fd(), PROGRAM_NAME)?;

            tracing::info!(
                src_index,
                host_veth_index,
                "attached DHCP redirect classifier"
            );
            Ok(Loaded {
                _prog: prog,
                _target_map: target_map,
            })
        })
        .await?;

        *self.loaded.lock().await = Some(loaded);
        Ok(())
    }
}

impl Default for EbpfManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterfaceManager for EbpfManager {
    async fn setup(&self) -> Result<(), NetifError> {
        tracing::info!("setting up eBPF DHCP redirect");

        if let Err(err) = self.cleanup().await {
            tracing::debug!(%err, "cleanup of stale resources failed, continuing");
        }

        self.create_veth_pair().await?;
        self.configure_container_veth().await?;
        self.load_and_attach().await?;

        tracing::info!(
            host_veth = HOST_VETH,
            container_veth = CONTAINER_VETH,
            "eBPF DHCP redirect ready"
        );
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), NetifError> {
        let mut errs = Vec::new();

        // Detach the classifier, then drop the loaded objects.
        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;
        let detach = ns::in_namespace(host_ns, || async {
            let handle = spawn_connection()?;
            if let Ok(src_index) = crate::manager::default_gateway_ifindex(&handle).await {
                if let Err(err) = tc::remove_bpf_filter(src_index as i32) {
                    tracing::debug!(%err, "removing TC filter failed");
                }
            }
            for name in [CONTAINER_VETH, HOST_VETH] {
                if let Err(err) = delete_if_present(&handle, name).await {
                    return Err(err);
                }
            }
            Ok(())
        })
        .await;
        if let Err(err) = detach {
            errs.push(err.to_string());
        }

        self.loaded.lock().await.take();

        // Deleting either end of the pair removes both, but a stale
        // container-side veth from a previous run may exist alone.
        let handle = spawn_connection()?;
        for name in [CONTAINER_VETH, HOST_VETH] {
            if let Err(err) = delete_if_present(&handle, name).await {
                errs.push(format!("container {name}: {err}"));
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(NetifError::Netlink(errs.join("; ")))
        }
    }
}
