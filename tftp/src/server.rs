/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! TFTP transport wiring: binds the UDP socket, adapts the mux onto the
//! transfer engine, rejects writes, and shuts down on cancellation.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use async_tftp::packet;
use async_tftp::server::TftpServerBuilder;
use async_trait::async_trait;
use futures_util::io::Cursor;

use crate::mux::ServeMux;
use crate::normalize::normalize;
use crate::{TftpError, TftpRequest};

#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_addr: SocketAddr,
    /// Advertised block size limit.
    pub block_size: u16,
    /// Per-transfer retransmission timeout.
    pub timeout: Duration,
    /// Retransmissions before a transfer is abandoned.
    pub max_send_retries: u32,
    /// Accepted for deployment parity; transfers already share the bound
    /// port, so this changes nothing.
    pub single_port: bool,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:69".parse().expect("valid bind address"),
            block_size: 512,
            timeout: Duration::from_secs(10),
            max_send_retries: 5,
            single_port: true,
        }
    }
}

struct MuxAdapter {
    mux: std::sync::Arc<ServeMux>,
}

#[async_trait]
impl async_tftp::server::Handler for MuxAdapter {
    type Reader = Cursor<Vec<u8>>;
    type Writer = Cursor<Vec<u8>>;

    async fn read_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
    ) -> Result<(Self::Reader, Option<u64>), packet::Error> {
        let raw = path.to_string_lossy();
        let req: TftpRequest = normalize(&raw);
        tracing::info!(%client, uri = %raw, filename = %req.filename, "tftp read request");

        match self.mux.dispatch(&req).await {
            Ok(content) => {
                let size = content.len() as u64;
                Ok((Cursor::new(content), Some(size)))
            }
            Err(TftpError::NotFound(name)) => {
                tracing::info!(%client, filename = %name, "file not found");
                Err(packet::Error::FileNotFound)
            }
            Err(err) => {
                tracing::error!(%client, filename = %req.filename, %err, "tftp serve failed");
                Err(packet::Error::Msg(err.to_string()))
            }
        }
    }

    async fn write_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
        _size: Option<u64>,
    ) -> Result<Self::Writer, packet::Error> {
        tracing::warn!(%client, filename = %path.display(), "rejecting tftp write request");
        Err(packet::Error::PermissionDenied)
    }
}

/// Serve TFTP until `shutdown` resolves.
pub async fn serve(
    config: TftpServerConfig,
    mux: std::sync::Arc<ServeMux>,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), TftpError> {
    let server = TftpServerBuilder::with_handler(MuxAdapter { mux })
        .bind(config.bind_addr)
        .timeout(config.timeout)
        .block_size_limit(config.block_size)
        .max_send_retries(config.max_send_retries)
        .build()
        .await
        .map_err(|err| TftpError::Transport(err.to_string()))?;

    tracing::info!(addr = %config.bind_addr, "starting tftp server");

    tokio::select! {
        result = server.serve() => {
            result.map_err(|err| TftpError::Transport(err.to_string()))
        }
        _ = shutdown => {
            tracing::info!("tftp server stopped");
            Ok(())
        }
    }
}
