// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scoring router.
//!
//! Selection runs in three phases: collect candidates (fresh heartbeat, hard
//! capability filters), fall back to a cloud worker when the pool is empty,
//! then pick the candidate with the greatest weighted VRAM+load score. A
//! worker whose heartbeat fails is skipped silently; routing errors are never
//! caused by a single bad worker.

use std::sync::Arc;

use crate::error::GatewayError;
use crate::types::{InferenceRequest, RequestContext, WorkerProfile};
use crate::worker::Worker;

const GIB: u64 = 1024 * 1024 * 1024;

/// Routes a request to the best-scoring eligible worker.
pub struct ScoreRouter {
    /// Weight of the free-VRAM score in the composite.
    vram_weight: f64,
    /// Weight of the free-capacity score in the composite.
    load_weight: f64,
}

struct Candidate {
    worker: Arc<dyn Worker>,
    vram_score: f64,
    load_score: f64,
}

impl ScoreRouter {
    pub fn new() -> Self {
        Self::with_weights(1.0, 1.0)
    }

    pub fn with_weights(vram_weight: f64, load_weight: f64) -> Self {
        Self {
            vram_weight,
            load_weight,
        }
    }

    /// Choose one worker for `request` out of `workers`.
    ///
    /// Ties are broken by traversal order: the first candidate seen with the
    /// top score wins. Callers must not rely on fallback ordering when
    /// several workers classify as fallback; the last one seen is kept.
    pub async fn select(
        &self,
        ctx: &RequestContext,
        workers: &[Arc<dyn Worker>],
        request: &InferenceRequest,
    ) -> Result<Arc<dyn Worker>, GatewayError> {
        let required_vram = estimate_model_vram(&request.model);

        let mut fallback: Option<Arc<dyn Worker>> = None;
        let mut candidates: Vec<Candidate> = Vec::new();

        for worker in workers {
            let profile = match worker.heartbeat(ctx).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::debug!(
                        worker = worker.id(),
                        error = %e,
                        "skipping worker: heartbeat failed"
                    );
                    continue;
                }
            };

            if is_fallback_worker(worker.id()) {
                fallback = Some(worker.clone());
                continue;
            }

            if !is_model_supported(&request.model, &profile.supported) {
                continue;
            }
            if profile.available_vram < required_vram {
                continue;
            }
            if profile.active_tasks >= profile.max_tasks {
                continue;
            }

            candidates.push(Candidate {
                worker: worker.clone(),
                vram_score: vram_score(&profile),
                load_score: load_score(&profile),
            });
        }

        if candidates.is_empty() {
            if let Some(fallback) = fallback {
                tracing::debug!(
                    worker = fallback.id(),
                    trace_id = ctx.trace_id(),
                    model = %request.model,
                    "no local candidates; using fallback worker"
                );
                return Ok(fallback);
            }
            return Err(GatewayError::NoRouteableWorker);
        }

        let mut best = &candidates[0];
        let mut best_score = self.composite(best);
        for candidate in &candidates[1..] {
            let score = self.composite(candidate);
            if score > best_score {
                best_score = score;
                best = candidate;
            }
        }

        tracing::info!(
            worker = best.worker.id(),
            score = best_score,
            trace_id = ctx.trace_id(),
            model = %request.model,
            "selected worker"
        );
        Ok(best.worker.clone())
    }

    fn composite(&self, candidate: &Candidate) -> f64 {
        candidate.vram_score * self.vram_weight + candidate.load_score * self.load_weight
    }
}

impl Default for ScoreRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimate the VRAM a model needs from size markers in its name. The table
/// is evaluated top-down and the first matching row wins, so a name carrying
/// several markers resolves to the earliest one.
pub fn estimate_model_vram(model: &str) -> u64 {
    let model = model.to_lowercase();
    if model.contains("8b") || model.contains("7b") {
        return 6 * GIB;
    }
    if model.contains("13b") || model.contains("14b") {
        return 12 * GIB;
    }
    if model.contains("30b") || model.contains("34b") || model.contains("32b") {
        return 20 * GIB;
    }
    if model.contains("70b") || model.contains("72b") || model.contains("67b") {
        return 40 * GIB;
    }
    // small or unknown models
    2 * GIB
}

fn is_model_supported(model: &str, supported: &[String]) -> bool {
    supported
        .iter()
        .any(|s| s == "*" || s.eq_ignore_ascii_case(model))
}

/// Workers whose id mentions `fallback` or `cloud` are the last-resort tier,
/// exempt from capability filters and scoring.
fn is_fallback_worker(worker_id: &str) -> bool {
    let id = worker_id.to_lowercase();
    id.contains("fallback") || id.contains("cloud")
}

/// Free-VRAM percentage, clamped to 0..=100. Zero when the worker reports no
/// VRAM at all (cloud workers).
fn vram_score(profile: &WorkerProfile) -> f64 {
    if profile.total_vram == 0 {
        return 0.0;
    }
    let percentage = profile.available_vram as f64 / profile.total_vram as f64 * 100.0;
    percentage.clamp(0.0, 100.0)
}

/// Free-capacity percentage, clamped to 0..=100. Zero when the worker has no
/// capacity configured or is at its cap.
fn load_score(profile: &WorkerProfile) -> f64 {
    if profile.max_tasks == 0 || profile.active_tasks >= profile.max_tasks {
        return 0.0;
    }
    let free = f64::from(profile.max_tasks - profile.active_tasks);
    (free / f64::from(profile.max_tasks) * 100.0).clamp(0.0, 100.0)
}
