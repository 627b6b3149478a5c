/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder,
};

/// HTTP request metrics, exposed on `/metrics`.
#[derive(Clone)]
pub struct HttpMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
}

impl HttpMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let namespace = "anvil_http";

        let requests_total = IntCounterVec::new(
            opts!("requests_total", "Total number of HTTP requests").namespace(namespace),
            &["path", "method", "code"],
        )
        .expect("requests_total metric is valid");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "HTTP request duration in seconds")
                .namespace(namespace),
            &["path", "method"],
        )
        .expect("request_duration_seconds metric is valid");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("requests_total registers once");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("request_duration_seconds registers once");

        Self {
            registry,
            requests_total,
            request_duration_seconds,
        }
    }

    pub fn observe(&self, path: &str, method: &str, code: u16, seconds: f64) {
        self.requests_total
            .with_label_values(&[path, method, &code.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method])
            .observe(seconds);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(%err, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}
