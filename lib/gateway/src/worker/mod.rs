// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker adapters.
//!
//! A [Worker] speaks one backend's protocol and presents the gateway with a
//! uniform capability set: identity, a profile heartbeat, and chunk-streaming
//! execution. Backends are driven through a [ChunkSink]; a sink error is
//! fatal to the adapter and unwinds `execute`, which in turn releases the
//! upstream connection. This single teardown path covers "client went away",
//! "quota exceeded" and "downstream parse error" alike.

mod http;
mod mock;

pub use http::HttpWorker;
pub use mock::MockWorker;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{InferenceRequest, RequestContext, StreamChunk, WorkerProfile};

/// Receiver side of a worker's chunk stream.
#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk downstream. Returning an error instructs the adapter
    /// to abort the inference and release its upstream resources.
    async fn send(&mut self, chunk: StreamChunk) -> Result<(), GatewayError>;
}

/// A concrete inference backend.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable worker identity.
    fn id(&self) -> &str;

    /// Current capability/load profile. May involve I/O for remote backends;
    /// must honor cancellation through `ctx`.
    async fn heartbeat(&self, ctx: &RequestContext) -> Result<WorkerProfile, GatewayError>;

    /// Drive one inference, delivering chunks to `sink` in arrival order.
    /// Returns `Ok` on clean completion, including graceful upstream
    /// termination; any failure (upstream, parse, cancellation or a sink
    /// error) propagates as `Err` after upstream resources are released.
    async fn execute(
        &self,
        ctx: &RequestContext,
        request: &InferenceRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), GatewayError>;
}

impl std::fmt::Debug for dyn Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id()).finish()
    }
}
