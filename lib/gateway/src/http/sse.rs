// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Server-sent-event frame construction and the cancel-on-drop body wrapper.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::GatewayError;

/// Terminator frame of a successful stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// A `data:` frame carrying a JSON payload.
pub fn data_frame<T: Serialize>(value: &T) -> Result<Bytes, GatewayError> {
    let json = serde_json::to_string(value).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// A named event frame carrying a JSON payload.
pub fn event_frame<T: Serialize>(event: &str, value: &T) -> Result<Bytes, GatewayError> {
    let json = serde_json::to_string(value).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Bytes::from(format!("event: {event}\ndata: {json}\n\n")))
}

/// Pass-through stream that cancels a [`CancellationToken`] when dropped.
///
/// Used as the response body of the streaming branch: when the client
/// disconnects, hyper drops the body, the token fires, and the worker
/// adapter's read loop unwinds on its next cancellation check.
pub struct CancelOnDrop<S> {
    stream: S,
    _guard: DropGuard,
}

pub fn cancel_on_drop<S>(stream: S, token: CancellationToken) -> CancelOnDrop<S> {
    CancelOnDrop {
        stream,
        _guard: token.drop_guard(),
    }
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}
