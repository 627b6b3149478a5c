/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! HTTP artifact router.
//!
//! Exposes the same artifact namespace as the TFTP router for clients
//! past the first boot stage: patched iPXE binaries, generated per-MAC
//! iPXE scripts, cached workload kernel/initramfs files, a liveness
//! probe, and Prometheus metrics.

mod metrics;
mod routes;

pub use metrics::HttpMetrics;
pub use routes::{router, AppState};

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("http server error: {0}")]
    Server(#[from] hyper::Error),
}

/// Serve the router until `shutdown` resolves.
pub async fn serve(
    bind_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), HttpError> {
    let app = router(state);

    tracing::info!(addr = %bind_addr, "starting http server");
    axum::Server::bind(&bind_addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("http server stopped");
    Ok(())
}
