// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OpenAI-compatible chat-completion gateway.
//!
//! The gateway dispatches inference requests across a heterogeneous fleet of
//! worker endpoints: local GPU boxes of varying capability plus cloud
//! fallbacks. A client issues a standard chat-completion call; the gateway
//! authenticates, rate-limits, selects one worker by live scoring of its
//! capability and load, streams the worker's server-sent chunks back to the
//! client with mid-stream quota enforcement, and reconciles quota at the end.
//!
//! Subsystems:
//! - [`registry`] — dynamic worker registry with heartbeat-based liveness and
//!   a background reaper.
//! - [`router`] — scoring router: hard capability filters plus weighted
//!   selection with cloud fallback.
//! - [`limiter`] — two-phase quota: pre-flight admission and post-flight
//!   consumption with overdraft.
//! - [`worker`] — worker adapters: the SSE remote adapter and the local mock.
//! - [`http`] — the axum service tying it all together.
//!
//! Cancellation is cooperative: a [`types::RequestContext`] carrying a
//! `CancellationToken` is threaded from the HTTP layer through router
//! heartbeats, the adapter's upstream connection and every read-loop
//! iteration, so a closed client or a quota trip tears the upstream link down
//! in one motion.

pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod protocols;
pub mod registry;
pub mod router;
pub mod types;
pub mod worker;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use types::{InferenceRequest, RequestContext, StreamChunk, WorkerProfile};
pub use worker::{ChunkSink, Worker};
