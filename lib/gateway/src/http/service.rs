// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP service assembly.
//!
//! [`HttpService::builder`] wires the registry, router, limiter and metrics
//! into an axum application serving:
//!
//! | Method | Path                    | Purpose                               |
//! |--------|-------------------------|---------------------------------------|
//! | POST   | `/v1/chat/completions`  | OpenAI-compatible chat completion     |
//! | POST   | `/v1/workers/heartbeat` | Worker profile upsert                 |
//! | GET    | `/health`               | Liveness plus registered worker count |
//! | GET    | `/metrics`              | Prometheus text exposition            |

use std::sync::Arc;

use axum::routing::{get, post};
use derive_builder::Builder;
use relay_runtime::{CancellationToken, ErrorContext, Result};

use crate::http::{metrics, openai, workers, Metrics};
use crate::limiter::InMemoryRateLimiter;
use crate::registry::InMemoryRegistry;
use crate::router::ScoreRouter;

/// Shared state behind every handler.
pub struct AppState {
    registry: Arc<InMemoryRegistry>,
    router: ScoreRouter,
    limiter: Arc<InMemoryRateLimiter>,
    metrics: Arc<Metrics>,
    prometheus_registry: prometheus::Registry,
    stream_token_ceiling: usize,
}

impl AppState {
    pub fn registry(&self) -> &Arc<InMemoryRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &ScoreRouter {
        &self.router
    }

    pub fn limiter(&self) -> &Arc<InMemoryRateLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn prometheus_registry(&self) -> &prometheus::Registry {
        &self.prometheus_registry
    }

    /// Token ceiling applied to streaming responses.
    pub fn stream_token_ceiling(&self) -> usize {
        self.stream_token_ceiling
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(build_fn(private, name = "build_internal"))]
pub struct HttpServiceConfig {
    #[builder(default = "String::from(\"0.0.0.0\")", setter(into))]
    host: String,

    #[builder(default = "8080")]
    port: u16,

    /// Streaming-mode token ceiling; exceeding it mid-stream tears the
    /// request down.
    #[builder(default = "50")]
    stream_token_ceiling: usize,

    #[builder(default = "1.0")]
    vram_weight: f64,

    #[builder(default = "1.0")]
    load_weight: f64,
}

pub struct HttpService {
    config: HttpServiceConfig,
    state: Arc<AppState>,
    router: axum::Router,
}

impl HttpService {
    pub fn builder() -> HttpServiceConfigBuilder {
        HttpServiceConfigBuilder::default()
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        self.state.registry.clone()
    }

    pub fn limiter(&self) -> Arc<InMemoryRateLimiter> {
        self.state.limiter.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.state.metrics.clone()
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Serve until `cancel` fires, then drain in-flight connections.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind to {address}"))?;
        tracing::info!(%address, "http service listening");

        let observer = cancel.clone();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                observer.cancelled().await;
                tracing::info!("http service shutting down; draining connections");
            })
            .await
            .context("http service failed")?;

        Ok(())
    }
}

impl HttpServiceConfigBuilder {
    pub fn build(&self) -> Result<HttpService> {
        let config = self.build_internal().context("invalid service config")?;

        let metrics = Arc::new(Metrics::new());
        let prometheus_registry = prometheus::Registry::new();
        metrics
            .register(&prometheus_registry)
            .context("failed to register metrics")?;

        let state = Arc::new(AppState {
            registry: Arc::new(InMemoryRegistry::new()),
            router: ScoreRouter::with_weights(config.vram_weight, config.load_weight),
            limiter: Arc::new(InMemoryRateLimiter::new()),
            metrics,
            prometheus_registry,
            stream_token_ceiling: config.stream_token_ceiling,
        });

        let router = axum::Router::new()
            .route("/v1/chat/completions", post(openai::chat_completions))
            .route("/v1/workers/heartbeat", post(workers::heartbeat))
            .route("/health", get(workers::health))
            .route("/metrics", get(metrics::handler))
            .with_state(state.clone());

        Ok(HttpService {
            config,
            state,
            router,
        })
    }
}
