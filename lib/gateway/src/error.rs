// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy of the gateway. Each variant maps onto an OpenAI-style
/// error `type` string and an HTTP status; SSE-phase errors are reported as
/// `event: error` frames instead of a status line.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing or invalid Authorization header")]
    MissingCredentials,

    #[error("Insufficient quota or invalid API key")]
    InsufficientQuota,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("No workers available")]
    NoWorkers,

    #[error("no available workers for request")]
    NoRouteableWorker,

    #[error("Token quota exceeded mid-stream")]
    QuotaExceeded,

    #[error("request cancelled")]
    Cancelled,

    #[error("Request timeout")]
    DeadlineExceeded,

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("failed to send request: {0}")]
    Upstream(String),

    #[error("failed to scan response: {0}")]
    Scan(String),

    #[error("failed to parse SSE data: {0}")]
    Parse(String),

    /// An error chunk forwarded from the worker mid-stream.
    #[error("{0}")]
    Stream(String),

    #[error("downstream client disconnected")]
    Disconnected,

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// The OpenAI-compatible error `type` string reported to clients.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::MissingCredentials => "authentication_error",
            GatewayError::InsufficientQuota => "insufficient_quota",
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::QuotaExceeded => "quota_error",
            GatewayError::DeadlineExceeded => "timeout_error",
            _ => "server_error",
        }
    }

    /// The HTTP status used when the error is reported outside an SSE stream.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::InsufficientQuota | GatewayError::QuotaExceeded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoWorkers | GatewayError::NoRouteableWorker => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::DeadlineExceeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::DeadlineExceeded
        } else {
            GatewayError::Upstream(e.to_string())
        }
    }
}
