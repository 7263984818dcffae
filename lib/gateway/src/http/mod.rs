// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP service for the Relay gateway.
//!
//! Serves OpenAI-compatible chat completions plus the worker heartbeat,
//! health and metrics endpoints. All requests, whether the client asks for
//! `stream=true` or `stream=false`, are driven against the selected worker as
//! a chunk stream; non-streaming responses are aggregated by the dispatcher,
//! so only one request-response pattern exists between gateway and workers.

pub mod error;
pub mod metrics;
mod openai;
pub mod service;
mod sse;
mod workers;

pub use error::ErrorResponse;
pub use metrics::{Metrics, RequestType, Status};
pub use service::{AppState, HttpService};
