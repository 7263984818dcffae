// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the HTTP service: request counts by model, request
//! type and final status, inflight gauges, and a request-duration histogram.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::http::service::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Unary,
    Stream,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Unary => "unary",
            RequestType::Stream => "stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

/// Request metrics tracked by the service. Obtain an [`InflightGuard`] at
/// dispatch time; dropping the guard records the final counters.
pub struct Metrics {
    request_counter: IntCounterVec,
    inflight_gauge: IntGaugeVec,
    request_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let request_counter = IntCounterVec::new(
            Opts::new(
                "relay_http_service_requests_total",
                "Total requests processed, by model, request type and final status",
            ),
            &["model", "request_type", "status"],
        )
        .unwrap();

        let inflight_gauge = IntGaugeVec::new(
            Opts::new(
                "relay_http_service_inflight_requests",
                "Requests currently being processed, by model",
            ),
            &["model"],
        )
        .unwrap();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "relay_http_service_request_duration_seconds",
                "Request duration in seconds, by model",
            ),
            &["model"],
        )
        .unwrap();

        Self {
            request_counter,
            inflight_gauge,
            request_duration,
        }
    }

    /// Register all collectors on `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.request_counter.clone()))?;
        registry.register(Box::new(self.inflight_gauge.clone()))?;
        registry.register(Box::new(self.request_duration.clone()))?;
        Ok(())
    }

    pub fn get_request_counter(
        &self,
        model: &str,
        request_type: &RequestType,
        status: &Status,
    ) -> u64 {
        self.request_counter
            .with_label_values(&[model, request_type.as_str(), status.as_str()])
            .get()
    }

    pub fn get_inflight_count(&self, model: &str) -> i64 {
        self.inflight_gauge.with_label_values(&[model]).get()
    }

    /// Start tracking one request. The guard reports `Error` unless
    /// [`InflightGuard::mark_ok`] is called before it drops.
    pub fn create_inflight_guard(
        self: &Arc<Self>,
        model: &str,
        request_type: RequestType,
    ) -> InflightGuard {
        self.inflight_gauge.with_label_values(&[model]).inc();
        InflightGuard {
            metrics: self.clone(),
            model: model.to_string(),
            request_type,
            status: Status::Error,
            start: Instant::now(),
        }
    }
}

/// RAII handle for one in-flight request.
pub struct InflightGuard {
    metrics: Arc<Metrics>,
    model: String,
    request_type: RequestType,
    status: Status,
    start: Instant,
}

impl InflightGuard {
    pub fn mark_ok(&mut self) {
        self.status = Status::Success;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.metrics
            .inflight_gauge
            .with_label_values(&[&self.model])
            .dec();
        self.metrics
            .request_counter
            .with_label_values(&[&self.model, self.request_type.as_str(), self.status.as_str()])
            .inc();
        self.metrics
            .request_duration
            .with_label_values(&[&self.model])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// `GET /metrics` — Prometheus text exposition.
pub(crate) async fn handler(State(state): State<Arc<AppState>>) -> Response {
    let families = state.prometheus_registry().gather();
    let mut buffer = String::new();
    let encoder = TextEncoder::new();
    match encoder.encode_utf8(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
