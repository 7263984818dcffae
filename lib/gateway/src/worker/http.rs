// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! SSE remote worker adapter.
//!
//! Speaks the OpenAI streaming protocol to one HTTP backend: POSTs the
//! chat-completion body, reads the response as server-sent events and emits
//! each choice delta as a neutral [`StreamChunk`]. The caller's context is
//! observed between every line read; cancelling it drops the response body,
//! which aborts the upstream socket within one poll cycle.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::error::GatewayError;
use crate::protocols::openai::{ChatCompletionStreamResponse, ChatMessage};
use crate::types::{InferenceRequest, RequestContext, StreamChunk, WorkerProfile};
use crate::worker::{ChunkSink, Worker};

/// Hard cap on a single SSE line. Large base64 attachments and long-thought
/// payloads can produce multi-megabyte lines; anything beyond this fails the
/// call instead of growing without bound.
const SSE_MAX_LINE: usize = 8 * 1024 * 1024;

/// Initial read-buffer capacity for the SSE line decoder.
const SSE_INITIAL_CAPACITY: usize = 1024 * 1024;

/// All inferences are propagated upstream as `stream=true`; the dispatcher
/// aggregates chunks itself when the client asked for a non-streaming
/// response, so only one request-response pattern exists upstream.
#[derive(Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

/// A worker reachable over HTTP speaking the OpenAI SSE protocol.
pub struct HttpWorker {
    id: String,
    url: String,
    client: reqwest::Client,
    profile: WorkerProfile,
    active_tasks: AtomicU32,
}

impl HttpWorker {
    /// `profile` is the capability snapshot advertised for this worker;
    /// `active_tasks` is tracked live by the adapter itself.
    pub fn new(url: impl Into<String>, profile: WorkerProfile) -> Self {
        Self {
            id: profile.worker_id.clone(),
            url: url.into(),
            // No client timeout: request lifetimes are governed by the
            // caller's context.
            client: reqwest::Client::new(),
            profile,
            active_tasks: AtomicU32::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn heartbeat(&self, ctx: &RequestContext) -> Result<WorkerProfile, GatewayError> {
        ctx.error_if_cancelled()?;
        let mut profile = self.profile.clone();
        profile.active_tasks = self.active_tasks.load(Ordering::Relaxed);
        Ok(profile)
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        request: &InferenceRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), GatewayError> {
        let _task = TaskGuard::new(&self.active_tasks);

        tracing::debug!(
            worker = %self.id,
            trace_id = %ctx.trace_id(),
            model = %request.model,
            "dispatching inference upstream"
        );

        let body = UpstreamRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: true,
        };

        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(GatewayError::Cancelled),
            result = self
                .client
                .post(&self.url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .header(reqwest::header::CACHE_CONTROL, "no-cache")
                .json(&body)
                .send() => result?,
        };

        if response.status() != reqwest::StatusCode::OK {
            return Err(GatewayError::UnexpectedStatus(response.status().as_u16()));
        }

        // The response body is dropped on every exit path below, releasing
        // the upstream connection.
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut lines = FramedRead::with_capacity(
            reader,
            LinesCodec::new_with_max_length(SSE_MAX_LINE),
            SSE_INITIAL_CAPACITY,
        );

        // Payload of the SSE block currently being assembled; only the first
        // `data:` line of a block counts.
        let mut data: Option<String> = None;

        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(GatewayError::Cancelled),
                line = lines.next() => line,
            };

            let line = match line {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(GatewayError::Scan(e.to_string())),
            };

            if line.is_empty() {
                if let Some(payload) = data.take() {
                    if deliver_block(&payload, sink).await? == BlockOutcome::Done {
                        return Ok(());
                    }
                }
                continue;
            }

            if data.is_none() {
                if let Some(payload) = line.strip_prefix("data: ") {
                    data = Some(payload.to_string());
                }
            }
        }

        // A final block without a terminating blank line still counts.
        if let Some(payload) = data.take() {
            deliver_block(&payload, sink).await?;
        }

        Ok(())
    }
}

#[derive(PartialEq)]
enum BlockOutcome {
    Continue,
    Done,
}

/// Parse one SSE payload and forward its deltas. A sink error aborts the
/// stream and propagates, tearing the upstream connection down.
async fn deliver_block(
    payload: &str,
    sink: &mut dyn ChunkSink,
) -> Result<BlockOutcome, GatewayError> {
    if payload == "[DONE]" {
        return Ok(BlockOutcome::Done);
    }

    let response: ChatCompletionStreamResponse =
        serde_json::from_str(payload).map_err(|e| GatewayError::Parse(e.to_string()))?;

    for choice in response.choices {
        let chunk = StreamChunk {
            content: choice.delta.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            error: None,
        };
        sink.send(chunk).await?;
    }

    Ok(BlockOutcome::Continue)
}

/// Keeps `active_tasks` accurate for the duration of one inference.
struct TaskGuard<'a> {
    active: &'a AtomicU32,
}

impl<'a> TaskGuard<'a> {
    fn new(active: &'a AtomicU32) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self { active }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
