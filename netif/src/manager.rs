/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! macvlan/ipvlan attachment lifecycle.
//!
//! The interface is created in the host namespace as a child of the
//! default-gateway interface, moved into the container namespace,
//! brought up, and addressed. Cleanup removes stale interfaces by name
//! in both namespaces and is safe to run before setup.

use std::net::IpAddr;
use std::os::fd::AsRawFd;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use rtnetlink::Handle;

use crate::ns;
use crate::{InterfaceManager, NetifError, DHCP_IF_ADDR};

const MACVLAN_MODE_BRIDGE: u32 = 4;
const IPVLAN_MODE_L2: u16 = 1;

/// RT_SCOPE_HOST: the address is only valid on this host; a /32 with
/// host scope produces no prefix route.
const RT_SCOPE_HOST: u8 = 254;

/// Which virtual link type carries broadcast DHCP into the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Macvlan,
    Ipvlan,
}

impl InterfaceKind {
    pub fn ifname(self) -> &'static str {
        match self {
            Self::Macvlan => "macvlan0",
            Self::Ipvlan => "ipvlan0",
        }
    }
}

/// Names cleaned up regardless of the configured kind, so a restart with
/// a different strategy never leaks the previous one.
const MANAGED_IFNAMES: [&str; 3] = ["macvlan0", "ipvlan0", "ipvlan0-wa"];

pub struct NetworkManager {
    kind: InterfaceKind,
}

impl NetworkManager {
    pub fn new(kind: InterfaceKind) -> Self {
        Self { kind }
    }

    /// Create the child interface in the host namespace and push it into
    /// this process's namespace.
    async fn create_and_move(&self) -> Result<(), NetifError> {
        let kind = self.kind;
        let container_ns = ns::open_ns(ns::SELF_NS_PATH)?;
        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;

        ns::in_namespace(host_ns, move || async move {
            let handle = spawn_connection()?;
            let parent = default_gateway_ifindex(&handle).await?;

            let name = kind.ifname().to_string();
            match kind {
                InterfaceKind::Macvlan => {
                    handle
                        .link()
                        .add()
                        .macvlan(name.clone(), parent, MACVLAN_MODE_BRIDGE)
                        .execute()
                        .await?;
                }
                InterfaceKind::Ipvlan => {
                    handle
                        .link()
                        .add()
                        .ipvlan(name.clone(), parent, IPVLAN_MODE_L2)
                        .execute()
                        .await?;
                }
            }
            tracing::debug!(interface = %name, parent, "created interface in host namespace");

            let index = link_index(&handle, &name)
                .await?
                .ok_or_else(|| NetifError::LinkNotFound(name.clone()))?;
            handle
                .link()
                .set(index)
                .setns_by_fd(container_ns.as_raw_fd())
                .execute()
                .await?;
            tracing::debug!(interface = %name, "moved interface to container namespace");
            Ok(())
        })
        .await
    }

    /// Bring the moved interface up and give it the DHCP address.
    async fn configure(&self) -> Result<(), NetifError> {
        let handle = spawn_connection()?;
        let name = self.kind.ifname();
        let index = link_index(&handle, name)
            .await?
            .ok_or_else(|| NetifError::LinkNotFound(name.to_string()))?;

        handle.link().set(index).up().execute().await?;

        let mut req = handle.address().add(index, IpAddr::V4(DHCP_IF_ADDR), 32);
        req.message_mut().header.scope =
            netlink_packet_route::address::AddressScope::Other(RT_SCOPE_HOST);
        match req.execute().await {
            Ok(()) => {}
            Err(err) if is_exists(&err) => {}
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(interface = %name, ip = %DHCP_IF_ADDR, "configured interface");
        Ok(())
    }

    /// Create a second, bridge-behaving ipvlan in the host namespace and
    /// prime the kernel's broadcast forwarding path with UDP broadcasts
    /// before and after. Without this, ipvlan L2 children may never see
    /// broadcast DHCP.
    async fn ipvlan_broadcast_workaround(&self) -> Result<(), NetifError> {
        if let Err(err) = broadcast_prime_in_host().await {
            tracing::debug!(%err, "pre-creation broadcast prime failed");
        }

        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;
        ns::in_namespace(host_ns, || async {
            let handle = spawn_connection()?;
            let parent = default_gateway_ifindex(&handle).await?;
            match handle
                .link()
                .add()
                .ipvlan("ipvlan0-wa".to_string(), parent, IPVLAN_MODE_L2)
                .execute()
                .await
            {
                Ok(()) => Ok(()),
                Err(err) if is_exists(&err) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
        .await?;

        if let Err(err) = broadcast_prime_in_host().await {
            tracing::debug!(%err, "post-creation broadcast prime failed");
        }
        Ok(())
    }
}

#[async_trait]
impl InterfaceManager for NetworkManager {
    async fn setup(&self) -> Result<(), NetifError> {
        tracing::info!(kind = ?self.kind, "setting up DHCP proxy interface");

        if let Err(err) = self.cleanup().await {
            tracing::debug!(%err, "cleanup of stale interfaces failed, continuing");
        }

        self.create_and_move().await?;
        self.configure().await?;

        if self.kind == InterfaceKind::Ipvlan {
            if let Err(err) = self.ipvlan_broadcast_workaround().await {
                tracing::error!(%err, "ipvlan broadcast workaround failed, broadcast packets may not arrive");
            }
        }

        tracing::info!(interface = %self.kind.ifname(), "DHCP proxy interface ready");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), NetifError> {
        let mut errs = Vec::new();

        let handle = spawn_connection()?;
        for name in MANAGED_IFNAMES {
            if let Err(err) = delete_if_present(&handle, name).await {
                errs.push(format!("container {name}: {err}"));
            }
        }

        let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;
        let host_result = ns::in_namespace(host_ns, || async {
            let handle = spawn_connection()?;
            let mut errs = Vec::new();
            for name in MANAGED_IFNAMES {
                if let Err(err) = delete_if_present(&handle, name).await {
                    errs.push(format!("host {name}: {err}"));
                }
            }
            Ok(errs)
        })
        .await;
        match host_result {
            Ok(host_errs) => errs.extend(host_errs),
            Err(err) => errs.push(err.to_string()),
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(NetifError::Netlink(errs.join("; ")))
        }
    }
}

/// Open a netlink connection on the current thread's namespace. The
/// connection task lands on whatever runtime is current, which is the
/// per-namespace runtime for host-side work.
pub(crate) fn spawn_connection() -> Result<Handle, NetifError> {
    let (connection, handle, _) =
        rtnetlink::new_connection().map_err(|err| NetifError::Netlink(err.to_string()))?;
    tokio::spawn(connection);
    Ok(handle)
}

pub(crate) async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>, NetifError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(link)) => Ok(Some(link.header.index)),
        Ok(None) => Ok(None),
        // A name miss surfaces as an error from the kernel.
        Err(_) => Ok(None),
    }
}

pub(crate) async fn delete_if_present(handle: &Handle, name: &str) -> Result<(), NetifError> {
    if let Some(index) = link_index(handle, name).await? {
        handle.link().del(index).execute().await?;
        tracing::debug!(interface = %name, "deleted interface");
    }
    Ok(())
}

/// The interface behind the default IPv4 route.
pub(crate) async fn default_gateway_ifindex(handle: &Handle) -> Result<u32, NetifError> {
    use netlink_packet_route::route::RouteAttribute;

    let mut routes = handle.route().get(rtnetlink::IpVersion::V4).execute();
    while let Some(route) = routes.try_next().await? {
        if route.header.destination_prefix_length != 0 {
            continue;
        }
        for attr in &route.attributes {
            if let RouteAttribute::Oif(index) = attr {
                return Ok(*index);
            }
        }
    }
    Err(NetifError::NoDefaultGateway)
}

pub(crate) fn is_exists(err: &rtnetlink::Error) -> bool {
    err.to_string().contains("File exists")
}

/// Send a UDP broadcast probe to port 67 in the host namespace.
async fn broadcast_prime_in_host() -> Result<(), NetifError> {
    let host_ns = ns::open_ns(ns::HOST_NS_PATH)?;
    ns::in_namespace(host_ns, || async {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_broadcast(true)?;
        socket.send_to(&[0u8], ("255.255.255.255", 67))?;
        tracing::debug!("sent broadcast prime packet");
        Ok(())
    })
    .await
}
