/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Standard route table for the TFTP artifact namespace.

use std::sync::Arc;

use anvil_backend::BackendReader;
use anvil_boot::script::ScriptConfig;

use crate::handlers::{
    BinaryHandler, EmbeddedFilesHandler, HookHandler, PiFirmwareHandler, PxelinuxHandler,
};
use crate::mux::ServeMux;
use crate::TftpError;

/// Dependencies of the standard deployment's route table.
pub struct RouterConfig {
    pub backend: Arc<dyn BackendReader>,
    pub cache: anvil_hook::Cache,
    /// Script snippet spliced into served iPXE binaries.
    pub ipxe_patch: Vec<u8>,
    pub script: ScriptConfig,
    /// Serve synthesized records for unknown MACs (auto-proxy mode).
    pub static_ipxe: bool,
}

/// Build the standard mux: iPXE binaries, PXELinux configs, cached
/// workload files, per-MAC Pi firmware, and the embedded Pi file table as
/// the default route.
pub fn standard_mux(config: RouterConfig) -> Result<ServeMux, TftpError> {
    let mux = ServeMux::new();

    mux.handle(
        r"\.(efi|kpxe|pxe)$",
        Arc::new(BinaryHandler::new(config.ipxe_patch)),
    )?;
    mux.handle(
        r"^pxelinux\.cfg/",
        Arc::new(PxelinuxHandler::new(
            config.backend.clone(),
            config.script.clone(),
            config.static_ipxe,
        )),
    )?;
    mux.handle(
        r"^(initramfs-|vmlinuz-)",
        Arc::new(HookHandler::new(config.cache.clone())),
    )?;
    mux.handle(
        r"^RPI_EFI\.fd$",
        Arc::new(PiFirmwareHandler::new(config.backend.clone())),
    )?;
    mux.set_default_handler(Arc::new(EmbeddedFilesHandler));

    Ok(mux)
}
