// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OpenAI chat-completion protocol types.
//!
//! Reference: <https://platform.openai.com/docs/api-reference/chat>
//!
//! Only `model`, `messages`, `temperature` and `stream` influence dispatch;
//! the remaining request fields are accepted for wire compatibility and
//! passed through untouched.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MIN_TOP_P: f32 = 0.0;
pub const MAX_TOP_P: f32 = 1.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum MessageRole {
    system,
    user,
    assistant,
    tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::system => write!(f, "system"),
            MessageRole::user => write!(f, "user"),
            MessageRole::assistant => write!(f, "assistant"),
            MessageRole::tool => write!(f, "tool"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// An OpenAI chat-completion request as received from clients.
#[derive(Serialize, Deserialize, Builder, Validate, Debug, Clone)]
#[builder(build_fn(private, name = "build_internal"))]
pub struct ChatCompletionRequest {
    /// ID of the model to use.
    #[builder(setter(into))]
    pub model: String,

    /// The conversation so far.
    #[builder(default)]
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature between 0 and 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 2.0))]
    #[builder(default, setter(into, strip_option))]
    pub temperature: Option<f32>,

    /// If set, partial message deltas are sent as data-only server-sent
    /// events, terminated by a `data: [DONE]` frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub max_tokens: Option<i32>,

    /// Nucleus sampling mass, between 0 and 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    #[builder(default, setter(into, strip_option))]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub n: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -2.0, max = 2.0))]
    #[builder(default, setter(into, strip_option))]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -2.0, max = 2.0))]
    #[builder(default, setter(into, strip_option))]
    pub presence_penalty: Option<f32>,
}

impl ChatCompletionRequest {
    pub fn builder() -> ChatCompletionRequestBuilder {
        ChatCompletionRequestBuilder::default()
    }
}

impl ChatCompletionRequestBuilder {
    /// Build and validate the request
    pub fn build(&self) -> anyhow::Result<ChatCompletionRequest> {
        let request = self.build_internal()?;
        request.validate()?;
        Ok(request)
    }

    pub fn add_message(&mut self, role: MessageRole, content: impl Into<String>) -> &mut Self {
        let message = ChatMessage {
            role,
            content: content.into(),
        };
        match &mut self.messages {
            Some(messages) => messages.push(message),
            None => self.messages = Some(vec![message]),
        }
        self
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_message(MessageRole::user, content)
    }
}

/// A complete (non-streaming) chat-completion response.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatCompletionChoice {
    pub index: u64,
    pub message: ChatMessage,
    pub finish_reason: String,
}

impl ChatCompletionResponse {
    /// A single-choice assistant response, as produced by the buffered
    /// dispatch branch.
    pub fn from_content(trace_id: &str, model: &str, content: String, created: u64) -> Self {
        Self {
            id: format!("chatcmpl-{trace_id}"),
            object: "chat.completion".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: MessageRole::assistant,
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
            usage: None,
        }
    }
}

/// One frame of an OpenAI streaming response.
///
/// `finish_reason` is an opaque pass-through string rather than an enum: the
/// gateway proxies whatever the upstream emits and must not reject
/// vendor-specific values.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ChatCompletionStreamResponse {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub object: String,
    pub created: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StreamChoice {
    pub index: u64,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental content of a streaming choice. `role` is an opaque
/// pass-through like `finish_reason`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionStreamResponse {
    /// A single-choice delta frame in the shape the gateway emits downstream.
    pub fn from_delta(
        trace_id: &str,
        model: &str,
        content: String,
        finish_reason: Option<String>,
        created: u64,
    ) -> Self {
        Self {
            id: format!("chatcmpl-{trace_id}"),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: Some(content),
                },
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
