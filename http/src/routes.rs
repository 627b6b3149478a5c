/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anvil_backend::BackendReader;
use anvil_boot::script::{self, MachineScript, ScriptConfig};
use anvil_boot::{extract_traceparent_from_filename, Traceparent};
use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, Path, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mac_address::MacAddress;

use crate::metrics::HttpMetrics;

/// Shared state of the HTTP artifact router.
pub struct AppState {
    pub backend: Arc<dyn BackendReader>,
    pub cache: anvil_hook::Cache,
    /// Script snippet spliced into served iPXE binaries.
    pub ipxe_patch: Vec<u8>,
    pub script: ScriptConfig,
    /// Serve synthesized records for unknown MACs (auto-proxy mode).
    pub static_ipxe: bool,
    pub metrics: HttpMetrics,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ipxe/binary/*path", get(binary))
        .route("/ipxe/script/*path", get(ipxe_script))
        .route("/images/*path", get(images))
        .route("/iso/*path", get(iso))
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), track))
        .with_state(state)
}

async fn track(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next<Body>,
) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    state.metrics.observe(
        &path,
        &method,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// `GET /ipxe/binary/{optional-mac}/<name>`: a patched embedded iPXE
/// binary. The MAC segment and any traceparent suffix are informational.
async fn binary(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let base = path.rsplit('/').next().unwrap_or(&path);
    let (name, _trace) = extract_traceparent_from_filename(base);

    let Some(content) = anvil_boot::Files::get(name) else {
        tracing::info!(filename = %name, "ipxe binary not found");
        return StatusCode::NOT_FOUND.into_response();
    };

    match anvil_boot::patch(content, &state.ipxe_patch) {
        Ok(patched) => octet_stream(patched),
        Err(err) => {
            tracing::error!(filename = %name, %err, "failed to patch binary");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /ipxe/script/{optional-mac}/auto.ipxe`: the generated per-client
/// iPXE script. The client is identified by the MAC path segment when
/// present, otherwise by the source IP of the request.
async fn ipxe_script(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(file) = segments.last() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !file.ends_with(".ipxe") {
        tracing::info!(%path, "unsupported script path");
        return StatusCode::NOT_FOUND.into_response();
    }

    let mac: Option<MacAddress> = segments
        .iter()
        .rev()
        .nth(1)
        .and_then(|s| s.replace('-', ":").parse().ok());

    let machine = match resolve_machine(&state, mac, remote.map(|c| c.0)).await {
        Ok(machine) => machine,
        Err(status) => return status.into_response(),
    };

    let trace = headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Traceparent>().ok());

    let rendered = script::render_ipxe(&machine.with_trace(trace), &state.script);
    tracing::info!(?mac, size = rendered.len(), "serving ipxe script");
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        rendered,
    )
        .into_response()
}

async fn resolve_machine(
    state: &AppState,
    mac: Option<MacAddress>,
    remote: Option<SocketAddr>,
) -> Result<MachineScript, StatusCode> {
    let lookup = match mac {
        Some(mac) => state.backend.get_by_mac(mac).await,
        None => match remote {
            Some(addr) => state.backend.get_by_ip(addr.ip()).await,
            None => return Err(StatusCode::NOT_FOUND),
        },
    };

    match lookup {
        Ok(hw) => {
            if !hw.netboot.allow_netboot {
                tracing::info!(?mac, "netboot not allowed");
                return Err(StatusCode::NOT_FOUND);
            }
            Ok(MachineScript::from_hardware(&hw, &state.script))
        }
        Err(err) if err.is_not_found() => {
            if state.static_ipxe {
                if let Some(mac) = mac {
                    return Ok(MachineScript::synthesized(mac, &state.script));
                }
            }
            tracing::info!(?mac, "no hardware record");
            Err(StatusCode::NOT_FOUND)
        }
        Err(err) => {
            tracing::error!(?mac, %err, "backend lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `GET /images/<name>`: cached workload kernel/initramfs files.
async fn images(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    match state.cache.read(&path).await {
        Some(content) => octet_stream(content),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /iso/...`: the installer ISO patcher is an external collaborator;
/// this endpoint only reserves the namespace.
async fn iso() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn healthcheck() -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
        .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
        .into_response()
}

fn octet_stream(content: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], content).into_response()
}
