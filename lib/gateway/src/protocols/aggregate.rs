// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Aggregates a worker's chunk stream into a single response body for
//! non-streaming clients.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::StreamChunk;
use crate::worker::ChunkSink;

/// Folds [`StreamChunk`]s into the accumulated message content. Token
/// accounting on this path counts UTF-8 bytes of chunk content; the streaming
/// path counts code points instead, and the two are deliberately not unified.
#[derive(Debug, Default)]
pub struct ChunkAggregator {
    content: String,
    total_tokens: usize,
    finish_reason: Option<String>,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated message content, in arrival order.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }

    /// Tokens consumed so far (UTF-8 bytes of content).
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }
}

#[async_trait]
impl ChunkSink for ChunkAggregator {
    async fn send(&mut self, chunk: StreamChunk) -> Result<(), GatewayError> {
        if let Some(message) = chunk.error {
            return Err(GatewayError::Stream(message));
        }
        self.total_tokens += chunk.content.len();
        self.content.push_str(&chunk.content);
        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accumulates_in_order() {
        let mut aggregator = ChunkAggregator::new();
        aggregator
            .send(StreamChunk::content("Hello,"))
            .await
            .unwrap();
        aggregator
            .send(StreamChunk {
                content: " world!".to_string(),
                finish_reason: Some("stop".to_string()),
                error: None,
            })
            .await
            .unwrap();

        assert_eq!(aggregator.content(), "Hello, world!");
        assert_eq!(aggregator.finish_reason(), Some("stop"));
        assert_eq!(aggregator.total_tokens(), "Hello, world!".len());
    }

    #[tokio::test]
    async fn test_counts_bytes_not_code_points() {
        let mut aggregator = ChunkAggregator::new();
        aggregator.send(StreamChunk::content("héllo")).await.unwrap();
        // "héllo" is 5 code points but 6 bytes
        assert_eq!(aggregator.total_tokens(), 6);
    }

    #[tokio::test]
    async fn test_error_chunk_fails_the_fold() {
        let mut aggregator = ChunkAggregator::new();
        aggregator.send(StreamChunk::content("ok")).await.unwrap();
        let err = aggregator
            .send(StreamChunk::error("upstream died"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Stream(_)));
        assert_eq!(aggregator.content(), "ok");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let aggregator = ChunkAggregator::new();
        assert_eq!(aggregator.content(), "");
        assert_eq!(aggregator.total_tokens(), 0);
        assert!(aggregator.finish_reason().is_none());
    }
}
