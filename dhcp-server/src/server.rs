/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The DHCP UDP server loop.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::handler::DhcpHandler;
use crate::packet::{self, DecodedPacket};
use crate::DhcpError;

#[derive(Debug, Clone)]
pub struct DhcpServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for DhcpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:67".parse().expect("valid bind address"),
        }
    }
}

/// Receive DHCP packets and dispatch each to the first handler that
/// claims it, until `shutdown` resolves. Each packet is handled
/// independently; malformed packets are logged and dropped.
pub async fn serve(
    config: DhcpServerConfig,
    handlers: Vec<Arc<dyn DhcpHandler>>,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), DhcpError> {
    let socket = UdpSocket::bind(config.bind_addr).await?;
    socket.set_broadcast(true)?;
    tracing::info!(addr = %config.bind_addr, "starting dhcp server");

    tokio::pin!(shutdown);
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("dhcp server stopped");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(ok) => ok,
                    Err(err) => {
                        tracing::warn!(%err, "recv failed");
                        continue;
                    }
                };
                handle_packet(&socket, &handlers, &buf[..len], peer).await;
            }
        }
    }
}

async fn handle_packet(
    socket: &UdpSocket,
    handlers: &[Arc<dyn DhcpHandler>],
    buf: &[u8],
    peer: SocketAddr,
) {
    let packet = match DecodedPacket::decode(buf) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::info!(%peer, %err, "dropping malformed packet");
            return;
        }
    };

    for handler in handlers {
        match handler.handle(&packet).await {
            Ok(Some(reply)) => {
                let (ip, port) = packet.reply_destination();
                let encoded = match packet::encode(&reply) {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        tracing::error!(%err, "failed to encode reply");
                        return;
                    }
                };
                let dest = SocketAddrV4::new(ip, port);
                if let Err(err) = socket.send_to(&encoded, SocketAddr::V4(dest)).await {
                    tracing::error!(%err, %dest, "failed to send reply");
                } else {
                    tracing::debug!(%dest, bytes = encoded.len(), "reply sent");
                }
                return;
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(%err, "handler failed, dropping packet");
                return;
            }
        }
    }
}
