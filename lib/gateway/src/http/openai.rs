// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Chat-completion dispatcher.
//!
//! One pipeline per request: extract the bearer credential, ask the limiter
//! for admission, parse and validate the envelope, mint a trace id, pull the
//! live worker set, let the router choose, then drive either the streaming or
//! the buffered branch. Quota is two-phase: admission up front, consumption
//! of the actual token count after a finished response — never on the error
//! paths.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::http::error::ErrorResponse;
use crate::http::metrics::RequestType;
use crate::http::service::AppState;
use crate::http::sse;
use crate::limiter::InMemoryRateLimiter;
use crate::protocols::openai::{ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamResponse};
use crate::protocols::{unix_timestamp, ChunkAggregator};
use crate::types::{InferenceRequest, RequestContext, StreamChunk};
use crate::worker::{ChunkSink, Worker};

/// `POST /v1/chat/completions`
pub(crate) async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(api_key) = extract_api_key(&headers) else {
        return GatewayError::MissingCredentials.into_response();
    };

    match state.limiter().allow(&api_key) {
        Ok(true) => {}
        Ok(false) => return GatewayError::InsufficientQuota.into_response(),
        Err(e) => {
            return GatewayError::Internal(format!("Rate limiter error: {e}")).into_response()
        }
    }

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return GatewayError::InvalidRequest(format!("Invalid request body: {e}"))
                .into_response()
        }
    };
    if request.model.is_empty() {
        return GatewayError::InvalidRequest("model is required".into()).into_response();
    }
    if request.messages.is_empty() {
        return GatewayError::InvalidRequest("messages is required".into()).into_response();
    }

    let ctx = RequestContext::new();
    let inference = InferenceRequest {
        trace_id: ctx.trace_id().to_string(),
        model: request.model.clone(),
        messages: request.messages,
        temperature: request.temperature,
        stream: request.stream.unwrap_or(false),
    };

    let request_type = if inference.stream {
        RequestType::Stream
    } else {
        RequestType::Unary
    };
    let mut guard = state
        .metrics()
        .create_inflight_guard(&inference.model, request_type);

    let workers = state.registry().get_available_workers();
    if workers.is_empty() {
        return GatewayError::NoWorkers.into_response();
    }

    let worker = match state.router().select(&ctx, &workers, &inference).await {
        Ok(worker) => worker,
        Err(e) => {
            tracing::warn!(trace_id = ctx.trace_id(), error = %e, "worker selection failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(
                    format!("Failed to select worker: {e}"),
                    "server_error",
                )),
            )
                .into_response();
        }
    };

    if inference.stream {
        handle_stream(state, ctx, worker, inference, api_key, guard).await
    } else {
        let response = handle_unary(&state, &ctx, worker, &inference, &api_key, &mut guard).await;
        drop(guard);
        response
    }
}

/// Parse `Authorization: Bearer <key>`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let key = value.strip_prefix("Bearer ")?;
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

/// Streaming-mode token accounting counts Unicode code points of the chunk
/// content, not UTF-8 bytes. The buffered branch counts bytes; the units are
/// deliberately distinct.
fn estimate_tokens(content: &str) -> usize {
    content.chars().count()
}

/// Sink of the streaming branch: serializes each chunk as an OpenAI frame,
/// enforces the token ceiling, and pushes frames into the response channel.
/// Any error it returns unwinds the worker adapter, which releases the
/// upstream connection — the uniform teardown path for quota trips, client
/// disconnects and mid-stream failures.
struct StreamingSink {
    tx: mpsc::Sender<Bytes>,
    trace_id: String,
    model: String,
    created: u64,
    ceiling: usize,
    total_tokens: usize,
}

impl StreamingSink {
    async fn write(&self, frame: Bytes) -> Result<(), GatewayError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| GatewayError::Disconnected)
    }

    async fn write_error_event(
        &self,
        message: &str,
        kind: &str,
        code: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut body = ErrorResponse::new(message, kind);
        if let Some(code) = code {
            body = body.with_code(code);
        }
        self.write(sse::event_frame("error", &body)?).await
    }
}

#[async_trait]
impl ChunkSink for StreamingSink {
    async fn send(&mut self, chunk: StreamChunk) -> Result<(), GatewayError> {
        if let Some(message) = chunk.error {
            self.write_error_event(&message, "server_error", Some("stream_error"))
                .await?;
            return Err(GatewayError::Stream(message));
        }

        self.total_tokens += estimate_tokens(&chunk.content);
        if self.total_tokens > self.ceiling {
            tracing::warn!(
                trace_id = %self.trace_id,
                ceiling = self.ceiling,
                "token quota exceeded mid-stream; tearing down upstream"
            );
            let _ = self
                .write_error_event("Token quota exceeded mid-stream", "quota_error", None)
                .await;
            return Err(GatewayError::QuotaExceeded);
        }

        let frame = ChatCompletionStreamResponse::from_delta(
            &self.trace_id,
            &self.model,
            chunk.content,
            chunk.finish_reason,
            self.created,
        );
        self.write(sse::data_frame(&frame)?).await
    }
}

async fn handle_stream(
    state: Arc<AppState>,
    ctx: RequestContext,
    worker: Arc<dyn Worker>,
    request: InferenceRequest,
    api_key: String,
    mut guard: crate::http::metrics::InflightGuard,
) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    let mut sink = StreamingSink {
        tx,
        trace_id: request.trace_id.clone(),
        model: request.model.clone(),
        created: unix_timestamp(),
        ceiling: state.stream_token_ceiling(),
        total_tokens: 0,
    };

    let limiter = state.limiter().clone();
    let exec_ctx = ctx.clone();
    tokio::spawn(async move {
        let result = worker.execute(&exec_ctx, &request, &mut sink).await;
        match result {
            Ok(()) => {
                let _ = sink.write(Bytes::from_static(sse::DONE_FRAME.as_bytes())).await;
                consume(&limiter, &api_key, sink.total_tokens, &exec_ctx);
                guard.mark_ok();
            }
            Err(e) if e.is_timeout() => {
                let _ = sink
                    .write_error_event("Request timeout", "timeout_error", Some("timeout"))
                    .await;
            }
            Err(GatewayError::QuotaExceeded) => {
                // the quota event was already written by the sink
                tracing::debug!(trace_id = exec_ctx.trace_id(), "stream ended by quota trip");
            }
            Err(GatewayError::Disconnected) | Err(GatewayError::Cancelled) => {
                tracing::debug!(trace_id = exec_ctx.trace_id(), "client went away mid-stream");
            }
            Err(e) => {
                tracing::warn!(trace_id = exec_ctx.trace_id(), error = %e, "stream failed");
                let _ = sink
                    .write_error_event(&e.to_string(), "server_error", Some("internal_error"))
                    .await;
            }
        }
    });

    // Dropping the body (client disconnect) cancels the request context; the
    // adapter observes it on its next read cycle.
    let frames = sse::cancel_on_drop(ReceiverStream::new(rx), ctx.token().clone())
        .map(Ok::<_, Infallible>);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

async fn handle_unary(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    worker: Arc<dyn Worker>,
    request: &InferenceRequest,
    api_key: &str,
    guard: &mut crate::http::metrics::InflightGuard,
) -> Response {
    let mut aggregator = ChunkAggregator::new();

    match worker.execute(ctx, request, &mut aggregator).await {
        Ok(()) => {
            let total_tokens = aggregator.total_tokens();
            let response = ChatCompletionResponse::from_content(
                &request.trace_id,
                &request.model,
                aggregator.into_content(),
                unix_timestamp(),
            );
            consume(state.limiter(), api_key, total_tokens, ctx);
            guard.mark_ok();
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) if e.is_timeout() => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ErrorResponse::new("Request timeout", "timeout_error")),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(trace_id = ctx.trace_id(), error = %e, "inference failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string(), "server_error")),
            )
                .into_response()
        }
    }
}

/// Phase-two quota: charge the finished request's actual cost.
fn consume(limiter: &InMemoryRateLimiter, api_key: &str, total_tokens: usize, ctx: &RequestContext) {
    if let Err(e) = limiter.consume(api_key, total_tokens as i64) {
        tracing::warn!(trace_id = ctx.trace_id(), error = %e, "failed to consume quota");
    }
}
