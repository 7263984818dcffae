// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process mock worker for local bootstrap and tests. Emits a canned
//! word-by-word stream with a configurable inter-chunk delay and keeps live
//! load/VRAM accounting so the router sees realistic profiles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{InferenceRequest, RequestContext, StreamChunk, WorkerProfile};
use crate::worker::{ChunkSink, Worker};

/// Assumed VRAM footprint of one running task on a mock GPU.
const TASK_VRAM: u64 = 2 * 1024 * 1024 * 1024;

pub struct MockWorker {
    id: String,
    models: Vec<String>,
    total_vram: u64,
    max_tasks: u32,
    active_tasks: AtomicU32,
    chunk_delay: Duration,
    script: Option<Vec<String>>,
    stream_error: Option<String>,
    fail_heartbeat: bool,
}

impl MockWorker {
    pub fn new(
        id: impl Into<String>,
        models: Vec<&str>,
        total_vram: u64,
        max_tasks: u32,
    ) -> Self {
        Self {
            id: id.into(),
            models: models.into_iter().map(String::from).collect(),
            total_vram,
            max_tasks,
            active_tasks: AtomicU32::new(0),
            chunk_delay: Duration::from_millis(50),
            script: None,
            stream_error: None,
            fail_heartbeat: false,
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Replace the canned response with an explicit chunk script.
    pub fn with_script(mut self, chunks: Vec<&str>) -> Self {
        self.script = Some(chunks.into_iter().map(String::from).collect());
        self
    }

    /// Emit an error chunk after the scripted content.
    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    pub fn with_failing_heartbeat(mut self) -> Self {
        self.fail_heartbeat = true;
        self
    }

    /// Registration-time profile snapshot.
    pub fn profile(&self) -> WorkerProfile {
        WorkerProfile {
            worker_id: self.id.clone(),
            supported: self.models.clone(),
            total_vram: self.total_vram,
            available_vram: self.available_vram(),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            max_tasks: self.max_tasks,
        }
    }

    fn available_vram(&self) -> u64 {
        let used = u64::from(self.active_tasks.load(Ordering::Relaxed)) * TASK_VRAM;
        self.total_vram.saturating_sub(used)
    }

    fn response_chunks(&self, model: &str) -> Vec<String> {
        if let Some(script) = &self.script {
            return script.clone();
        }
        [
            "Hello", "!", " I", " am", " a", " mock", " worker", " on", " ", self.id.as_str(),
            ".", " I", " received", " your", " request", " for", " model", " '", model, "'.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn heartbeat(&self, ctx: &RequestContext) -> Result<WorkerProfile, GatewayError> {
        ctx.error_if_cancelled()?;
        if self.fail_heartbeat {
            return Err(GatewayError::Internal("mock heartbeat failure".into()));
        }
        Ok(self.profile())
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        request: &InferenceRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), GatewayError> {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
        let result = self.run(ctx, request, sink).await;
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

impl MockWorker {
    async fn run(
        &self,
        ctx: &RequestContext,
        request: &InferenceRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), GatewayError> {
        let chunks = self.response_chunks(&request.model);
        let last = chunks.len().saturating_sub(1);

        for (i, content) in chunks.into_iter().enumerate() {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }

            let terminal = i == last && self.stream_error.is_none();
            sink.send(StreamChunk {
                content,
                finish_reason: terminal.then(|| "stop".to_string()),
                error: None,
            })
            .await?;
        }

        if let Some(message) = &self.stream_error {
            sink.send(StreamChunk::error(message.clone())).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::test_util::{CollectSink, FailAfterSink};

    fn request(model: &str) -> InferenceRequest {
        InferenceRequest {
            trace_id: "trace-1".to_string(),
            model: model.to_string(),
            messages: vec![],
            temperature: None,
            stream: true,
        }
    }

    fn quick_mock() -> MockWorker {
        MockWorker::new("gpu-mock-01", vec!["llama-7b"], 12 * 1024 * 1024 * 1024, 2)
            .with_chunk_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_scripted_stream_marks_terminal_chunk() {
        let worker = quick_mock().with_script(vec!["a", "b", "c"]);
        let mut sink = CollectSink::new();

        worker
            .execute(&RequestContext::new(), &request("llama-7b"), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.chunks.len(), 3);
        assert_eq!(sink.chunks[0].finish_reason, None);
        assert_eq!(sink.chunks[2].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_sink_error_stops_the_stream() {
        let worker = quick_mock().with_script(vec!["a", "b", "c"]);
        let mut sink = FailAfterSink::new(1);

        let err = worker
            .execute(&RequestContext::new(), &request("llama-7b"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded));
        assert_eq!(sink.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_between_chunks() {
        let worker = quick_mock()
            .with_script(vec!["a", "b", "c"])
            .with_chunk_delay(Duration::from_millis(20));
        let ctx = RequestContext::new();
        let token = ctx.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let mut sink = CollectSink::new();
        let err = worker
            .execute(&ctx, &request("llama-7b"), &mut sink)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.chunks.len() < 3);
    }

    #[tokio::test]
    async fn test_error_chunk_after_script() {
        let worker = quick_mock()
            .with_script(vec!["a"])
            .with_stream_error("backend exploded");
        let mut sink = CollectSink::new();

        worker
            .execute(&RequestContext::new(), &request("llama-7b"), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.chunks.len(), 2);
        assert_eq!(sink.chunks[1].error.as_deref(), Some("backend exploded"));
        // error chunks never carry a finish reason
        assert_eq!(sink.chunks[0].finish_reason, None);
    }

    #[tokio::test]
    async fn test_heartbeat_accounts_for_active_tasks() {
        let worker = quick_mock();
        let ctx = RequestContext::new();

        let idle = worker.heartbeat(&ctx).await.unwrap();
        assert_eq!(idle.available_vram, idle.total_vram);

        worker.active_tasks.store(2, Ordering::Relaxed);
        let busy = worker.heartbeat(&ctx).await.unwrap();
        assert_eq!(busy.active_tasks, 2);
        assert_eq!(busy.available_vram, busy.total_vram - 2 * TASK_VRAM);
    }

    #[tokio::test]
    async fn test_failing_heartbeat() {
        let worker = quick_mock().with_failing_heartbeat();
        let err = worker.heartbeat(&RequestContext::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }
}
