/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The TFTP route handlers: embedded iPXE binaries, generated PXELinux
//! configs, cached workload files, and Raspberry Pi firmware.

use std::sync::Arc;

use anvil_backend::BackendReader;
use anvil_boot::script::{self, MachineScript, ScriptConfig};
use async_trait::async_trait;
use mac_address::MacAddress;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::mux::TftpHandler;
use crate::normalize::TftpRequest;
use crate::TftpError;

/// `pxelinux.cfg/<hwtype>-<mac>` where hwtype is exactly two hex digits
/// (RFC 2132 hardware types; `01` for Ethernet).
static PXELINUX_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pxelinux\.cfg/([0-9a-fA-F]{2})-(.+)$").expect("pxelinux pattern compiles")
});

/// Serves embedded iPXE binaries, patched at serve time.
pub struct BinaryHandler {
    patch: Vec<u8>,
}

impl BinaryHandler {
    pub fn new(patch: Vec<u8>) -> Self {
        Self { patch }
    }
}

#[async_trait]
impl TftpHandler for BinaryHandler {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        let Some(content) = anvil_boot::Files::get(&req.filename) else {
            tracing::info!(filename = %req.filename, "ipxe binary not found");
            return Err(TftpError::NotFound(req.filename.clone()));
        };
        let patched = anvil_boot::patch(content, &self.patch)?;
        tracing::info!(filename = %req.filename, size = patched.len(), "serving ipxe binary");
        Ok(patched)
    }
}

/// Renders PXELinux/extlinux configs for U-Boot PXE clients.
pub struct PxelinuxHandler {
    backend: Arc<dyn BackendReader>,
    config: ScriptConfig,
    /// Serve synthesized records for unknown MACs (auto-proxy mode).
    static_ipxe: bool,
}

impl PxelinuxHandler {
    pub fn new(backend: Arc<dyn BackendReader>, config: ScriptConfig, static_ipxe: bool) -> Self {
        Self {
            backend,
            config,
            static_ipxe,
        }
    }

    async fn machine_for(&self, mac: MacAddress) -> Result<MachineScript, TftpError> {
        match self.backend.get_by_mac(mac).await {
            Ok(hw) => {
                let mut machine = MachineScript::from_hardware(&hw, &self.config);
                if hw.dhcp.arch.is_none() {
                    // U-Boot PXE clients are overwhelmingly 64-bit ARM.
                    machine.arch = "aarch64".to_string();
                    machine.kernel = "vmlinuz-aarch64".to_string();
                    machine.initrd = "initramfs-aarch64".to_string();
                }
                Ok(machine)
            }
            Err(err) if err.is_not_found() && self.static_ipxe => {
                Ok(MachineScript::synthesized(mac, &self.config))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl TftpHandler for PxelinuxHandler {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        if req.filename == "pxelinux.cfg/default" {
            return Ok(script::render_pxelinux_default().as_bytes().to_vec());
        }

        let Some(caps) = PXELINUX_NAME.captures(&req.filename) else {
            return Err(TftpError::NotFound(req.filename.clone()));
        };
        let mac_str = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let Ok(mac) = mac_str.replace('-', ":").parse::<MacAddress>() else {
            tracing::info!(filename = %req.filename, "invalid MAC in pxelinux.cfg request");
            return Err(TftpError::NotFound(req.filename.clone()));
        };

        let machine = self.machine_for(mac).await?.with_trace(req.trace);
        let rendered = script::render_pxelinux(&machine, &self.config);
        tracing::info!(%mac, size = rendered.len(), "serving generated pxelinux config");
        Ok(rendered.into_bytes())
    }
}

/// Serves kernel/initramfs files out of the workload cache.
pub struct HookHandler {
    cache: anvil_hook::Cache,
}

impl HookHandler {
    pub fn new(cache: anvil_hook::Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TftpHandler for HookHandler {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        match self.cache.read(&req.filename).await {
            Some(content) => {
                tracing::info!(filename = %req.filename, size = content.len(), "serving cached workload file");
                Ok(content)
            }
            None => Err(TftpError::NotFound(req.filename.clone())),
        }
    }
}

/// Serves the per-MAC Raspberry Pi UEFI firmware volume.
///
/// When the backend forbids netboot, knows nothing about the MAC, or the
/// per-client build fails, the unmodified base volume is served instead:
/// a Pi that cannot netboot into the workload should still get firmware
/// it can boot.
pub struct PiFirmwareHandler {
    backend: Arc<dyn BackendReader>,
}

impl PiFirmwareHandler {
    pub fn new(backend: Arc<dyn BackendReader>) -> Self {
        Self { backend }
    }

    async fn allow_netboot(&self, mac: MacAddress) -> bool {
        match self.backend.get_by_mac(mac).await {
            Ok(hw) => hw.netboot.allow_netboot,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TftpHandler for PiFirmwareHandler {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        let Some(base) = anvil_firmware::Files::base_firmware() else {
            return Err(TftpError::NotFound(req.filename.clone()));
        };

        let Some(mac) = req.mac else {
            return Ok(base.to_vec());
        };
        if !self.allow_netboot(mac).await {
            return Ok(base.to_vec());
        }

        match anvil_firmware::build_for_mac(base, mac) {
            Ok(image) => {
                tracing::info!(%mac, size = image.len(), "serving per-client firmware volume");
                Ok(image)
            }
            Err(err) => {
                tracing::error!(%mac, %err, "firmware build failed, serving base volume");
                Ok(base.to_vec())
            }
        }
    }
}

/// Default handler: the embedded Raspberry Pi boot file table.
pub struct EmbeddedFilesHandler;

#[async_trait]
impl TftpHandler for EmbeddedFilesHandler {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        match anvil_firmware::Files::get(&req.filename) {
            Some(content) => Ok(content.to_vec()),
            None => Err(TftpError::NotFound(req.filename.clone())),
        }
    }
}
