// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker-facing endpoints: heartbeat ingestion and gateway liveness.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::GatewayError;
use crate::http::service::AppState;
use crate::types::WorkerProfile;

/// `POST /v1/workers/heartbeat` — upsert a worker's profile. Workers without
/// a registered adapter stay invisible to selection but keep their liveness
/// refreshed.
pub(crate) async fn heartbeat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let profile: WorkerProfile = match serde_json::from_slice(&body) {
        Ok(profile) => profile,
        Err(e) => {
            return GatewayError::InvalidRequest(format!("Invalid request body: {e}"))
                .into_response()
        }
    };

    if profile.worker_id.is_empty() {
        return GatewayError::InvalidRequest("worker_id is required".into()).into_response();
    }

    let worker_id = profile.worker_id.clone();
    if let Err(e) = state.registry().heartbeat(profile) {
        return GatewayError::Internal(format!("Failed to update registry: {e}")).into_response();
    }

    tracing::debug!(worker_id = %worker_id, "heartbeat accepted");
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "worker_id": worker_id,
        })),
    )
        .into_response()
}

/// `GET /health` — liveness plus the number of registered workers.
pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "workers": state.registry().worker_count(),
    }))
    .into_response()
}
