/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;

use crate::normalize::TftpRequest;
use crate::TftpError;

/// A TFTP read handler: resolve a normalized request to file contents.
#[async_trait]
pub trait TftpHandler: Send + Sync {
    async fn serve(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError>;
}

struct PatternHandler {
    pattern: Regex,
    handler: Arc<dyn TftpHandler>,
}

/// A TFTP request multiplexer.
///
/// Handlers are tried in registration order against the normalized
/// filename; the first matching pattern wins. When nothing matches the
/// default handler is consulted, and a miss there is a not-found.
#[derive(Default)]
pub struct ServeMux {
    inner: RwLock<MuxInner>,
}

#[derive(Default)]
struct MuxInner {
    patterns: Vec<PatternHandler>,
    default_handler: Option<Arc<dyn TftpHandler>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for filenames matching `pattern`.
    pub fn handle(
        &self,
        pattern: &str,
        handler: Arc<dyn TftpHandler>,
    ) -> Result<(), TftpError> {
        let regex = Regex::new(pattern).map_err(|source| TftpError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.inner
            .write()
            .expect("mux lock poisoned")
            .patterns
            .push(PatternHandler {
                pattern: regex,
                handler,
            });
        Ok(())
    }

    pub fn set_default_handler(&self, handler: Arc<dyn TftpHandler>) {
        self.inner.write().expect("mux lock poisoned").default_handler = Some(handler);
    }

    /// Dispatch a normalized request to the first matching handler.
    pub async fn dispatch(&self, req: &TftpRequest) -> Result<Vec<u8>, TftpError> {
        let handler = {
            let inner = self.inner.read().expect("mux lock poisoned");
            let matched = inner
                .patterns
                .iter()
                .find(|ph| ph.pattern.is_match(&req.filename));
            match matched {
                Some(ph) => {
                    tracing::debug!(
                        filename = %req.filename,
                        pattern = %ph.pattern,
                        "request matched pattern"
                    );
                    Some(ph.handler.clone())
                }
                None => inner.default_handler.clone(),
            }
        };

        match handler {
            Some(handler) => handler.serve(req).await,
            None => Err(TftpError::NotFound(req.filename.clone())),
        }
    }
}
