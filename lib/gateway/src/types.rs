// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core data model shared by the registry, router and worker adapters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::GatewayError;
use crate::protocols::openai::ChatMessage;

/// Snapshot of a worker's capabilities and live load, produced at
/// registration and refreshed on each heartbeat.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WorkerProfile {
    /// Opaque printable identity, unique within a running gateway. A
    /// case-insensitive substring match against `"fallback"` or `"cloud"`
    /// classifies the worker as the last-resort fallback tier.
    pub worker_id: String,

    /// Model names this worker serves. A single `"*"` entry means any model.
    pub supported: Vec<String>,

    /// Total device memory in bytes. Zero for cloud workers, whose capacity
    /// is unlimited from the gateway's point of view.
    pub total_vram: u64,

    /// Device memory currently free, in bytes.
    pub available_vram: u64,

    /// Number of inferences currently running on the worker.
    pub active_tasks: u32,

    /// Hard admission cap: the worker is full once
    /// `active_tasks >= max_tasks`.
    pub max_tasks: u32,
}

/// A single chunk of a streaming response in neutral form. At most one of
/// `content` and `error` is meaningful; `finish_reason` is set only on the
/// terminal chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// An inference request after ingress validation, in the form the router and
/// the worker adapters operate on.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Correlation id minted at ingress, carried by the request context and
    /// echoed in log lines and response ids.
    pub trace_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

/// Per-request context: the trace id plus the cancellation token that is the
/// single channel through which cancellation flows from the HTTP layer to the
/// adapter and onward to the upstream connection.
///
/// Cheap to clone; all clones observe the same token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: Arc<str>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Mint a fresh context with a new trace id and its own token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Mint a fresh context observing the given token.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string().into(),
            cancel,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Shortcut for cooperative cancellation checks between I/O operations.
    pub fn error_if_cancelled(&self) -> Result<(), GatewayError> {
        if self.cancel.is_cancelled() {
            Err(GatewayError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A guard that cancels this context when dropped. Tying the guard to the
    /// response body makes a departed client cancel the whole pipeline.
    pub fn drop_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
