// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests driving the real HTTP service over localhost.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relay_gateway::http::{HttpService, RequestType, Status};
use relay_gateway::limiter::InMemoryRateLimiter;
use relay_gateway::registry::InMemoryRegistry;
use relay_gateway::worker::MockWorker;
use relay_runtime::CancellationToken;
use serde_json::{json, Value};

const API_KEY: &str = "test-key-123";

struct TestService {
    base: String,
    registry: Arc<InMemoryRegistry>,
    limiter: Arc<InMemoryRateLimiter>,
    metrics: Arc<relay_gateway::http::Metrics>,
    token: CancellationToken,
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Boot the service on `port` and wait for it to accept connections.
async fn start_service(port: u16) -> TestService {
    let service = HttpService::builder().port(port).build().unwrap();
    let registry = service.registry();
    let limiter = service.limiter();
    let metrics = service.metrics();

    let token = CancellationToken::new();
    let run_token = token.clone();
    tokio::spawn(async move { service.run(run_token).await });

    let base = format!("http://localhost:{port}");
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base}/health")).send().await.is_ok() {
            return TestService {
                base,
                registry,
                limiter,
                metrics,
                token,
            };
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("service on port {port} did not come up");
}

fn quick_mock(id: &str, script: Vec<&str>) -> Arc<MockWorker> {
    Arc::new(
        MockWorker::new(id, vec!["llama-7b"], 12 * 1024 * 1024 * 1024, 4)
            .with_chunk_delay(Duration::ZERO)
            .with_script(script),
    )
}

fn chat_body(stream: bool) -> Value {
    json!({
        "model": "llama-7b",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream,
    })
}

/// Split an SSE body into `(event, data)` pairs.
fn parse_sse(body: &str) -> Vec<(Option<String>, String)> {
    body.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    if data.is_empty() {
                        data = rest.to_string();
                    }
                }
            }
            (event, data)
        })
        .collect()
}

#[tokio::test]
async fn test_authentication_and_admission() {
    let service = start_service(8931).await;
    let client = reqwest::Client::new();
    let url = format!("{}/v1/chat/completions", service.base);

    // no Authorization header
    let response = client.post(&url).json(&chat_body(false)).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");

    // malformed scheme
    let response = client
        .post(&url)
        .header("Authorization", "Basic abc")
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // unknown key
    let response = client
        .post(&url)
        .bearer_auth("who-dis")
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "insufficient_quota");

    // known key with an exhausted balance
    service.limiter.grant("broke-key", 0);
    let response = client
        .post(&url)
        .bearer_auth("broke-key")
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn test_request_validation() {
    let service = start_service(8932).await;
    service.limiter.grant(API_KEY, 100);
    let client = reqwest::Client::new();
    let url = format!("{}/v1/chat/completions", service.base);

    // not JSON at all
    let response = client
        .post(&url)
        .bearer_auth(API_KEY)
        .header("content-type", "application/json")
        .body("{nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    // missing model
    let response = client
        .post(&url)
        .bearer_auth(API_KEY)
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // empty messages
    let response = client
        .post(&url)
        .bearer_auth(API_KEY)
        .json(&json!({"model": "llama-7b", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "messages is required");
}

#[tokio::test]
async fn test_no_workers_returns_503() {
    let service = start_service(8933).await;
    service.limiter.grant(API_KEY, 100);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "No workers available");
}

#[tokio::test]
async fn test_streaming_happy_path() {
    let service = start_service(8934).await;
    service.limiter.grant(API_KEY, 100);
    let worker = quick_mock("gpu-01", vec!["Hello", " world", "!"]);
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream",
    );
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = response.text().await.unwrap();
    assert!(body.ends_with("data: [DONE]\n\n"), "stream must end with the DONE frame: {body:?}");

    let frames = parse_sse(&body);
    let data_frames: Vec<&String> = frames
        .iter()
        .filter(|(event, data)| event.is_none() && data != "[DONE]")
        .map(|(_, data)| data)
        .collect();
    assert_eq!(data_frames.len(), 3);

    let mut content = String::new();
    for data in &data_frames {
        let frame: Value = serde_json::from_str(data).unwrap();
        assert_eq!(frame["object"], "chat.completion.chunk");
        assert!(frame["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(frame["model"], "llama-7b");
        content.push_str(frame["choices"][0]["delta"]["content"].as_str().unwrap());
    }
    assert_eq!(content, "Hello world!");

    // terminal frame carries the finish reason
    let last: Value = serde_json::from_str(data_frames.last().unwrap()).unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");

    // post-paid quota: 12 code points consumed
    assert_eq!(service.limiter.balance(API_KEY), Some(100 - 12));
}

#[tokio::test]
async fn test_streaming_quota_trip() {
    let service = start_service(8935).await;
    service.limiter.grant(API_KEY, 100);
    // 20 chunks of 5 code points each against the default ceiling of 50:
    // the 11th chunk trips the quota.
    let worker = quick_mock("gpu-01", vec!["Hello"; 20]);
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let body = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(true))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(!body.contains("[DONE]"), "no DONE after a quota trip");

    let frames = parse_sse(&body);
    let data_frames: Vec<_> = frames.iter().filter(|(event, _)| event.is_none()).collect();
    assert_eq!(data_frames.len(), 10, "exactly the chunks under the ceiling");

    let error_frames: Vec<_> = frames
        .iter()
        .filter(|(event, _)| event.as_deref() == Some("error"))
        .collect();
    assert_eq!(error_frames.len(), 1);
    let error: Value = serde_json::from_str(&error_frames[0].1).unwrap();
    assert_eq!(error["error"]["type"], "quota_error");
    assert_eq!(error["error"]["message"], "Token quota exceeded mid-stream");

    // the failed stream is never charged
    assert_eq!(service.limiter.balance(API_KEY), Some(100));
}

#[tokio::test]
async fn test_buffered_round_trip() {
    let service = start_service(8936).await;
    service.limiter.grant(API_KEY, 100);
    let worker = quick_mock("gpu-01", vec!["The", " answer", " is", " 42."]);
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "The answer is 42.");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    // buffered accounting counts UTF-8 bytes
    let expected = "The answer is 42.".len() as i64;
    assert_eq!(service.limiter.balance(API_KEY), Some(100 - expected));
}

#[tokio::test]
async fn test_stream_error_event() {
    let service = start_service(8937).await;
    service.limiter.grant(API_KEY, 100);
    let worker = Arc::new(
        MockWorker::new("gpu-01", vec!["llama-7b"], 12 * 1024 * 1024 * 1024, 4)
            .with_chunk_delay(Duration::ZERO)
            .with_script(vec!["partial"])
            .with_stream_error("backend exploded"),
    );
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let body = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(true))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(!body.contains("[DONE]"));
    let frames = parse_sse(&body);
    let error_frame = frames
        .iter()
        .find(|(event, _)| event.as_deref() == Some("error"))
        .expect("an error event must be emitted");
    let error: Value = serde_json::from_str(&error_frame.1).unwrap();
    assert_eq!(error["error"]["type"], "server_error");
    assert_eq!(error["error"]["code"], "stream_error");
    assert_eq!(error["error"]["message"], "backend exploded");

    // errored streams are not charged
    assert_eq!(service.limiter.balance(API_KEY), Some(100));
}

#[tokio::test]
async fn test_client_disconnect_stops_the_worker() {
    let service = start_service(8938).await;
    service.limiter.grant(API_KEY, 100);
    let worker = Arc::new(
        MockWorker::new("gpu-01", vec!["llama-7b"], 12 * 1024 * 1024 * 1024, 4)
            .with_chunk_delay(Duration::from_millis(50))
            .with_script(vec!["a"; 8]),
    );
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(true))
        .send()
        .await
        .unwrap();

    // read one frame, then hang up
    let mut stream = response.bytes_stream();
    let _ = stream.next().await;
    drop(stream);

    // give the 8-chunk stream time to have finished, had it kept running
    tokio::time::sleep(Duration::from_millis(800)).await;

    // the pipeline unwound before completion, so nothing was consumed
    assert_eq!(service.limiter.balance(API_KEY), Some(100));
}

#[tokio::test]
async fn test_worker_heartbeat_and_health() {
    let service = start_service(8939).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/workers/heartbeat", service.base))
        .json(&json!({
            "worker_id": "gpu-external-01",
            "supported": ["llama-7b"],
            "total_vram": 12_884_901_888u64,
            "available_vram": 8_589_934_592u64,
            "active_tasks": 0,
            "max_tasks": 2,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["worker_id"], "gpu-external-01");

    // missing worker_id
    let response = client
        .post(format!("{}/v1/workers/heartbeat", service.base))
        .json(&json!({"supported": ["llama-7b"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "worker_id is required");

    // the heartbeat-only entry shows up in health...
    let body: Value = client
        .get(format!("{}/health", service.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"], 1);

    // ...but is not a selection candidate
    service.limiter.grant(API_KEY, 100);
    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_metrics_counters_and_exposition() {
    let service = start_service(8940).await;
    service.limiter.grant(API_KEY, 100);
    let worker = quick_mock("gpu-01", vec!["ok"]);
    service.registry.register_worker(worker.clone(), worker.profile());

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", service.base))
        .bearer_auth(API_KEY)
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let _ = response.bytes().await.unwrap();

    assert_eq!(
        service
            .metrics
            .get_request_counter("llama-7b", &RequestType::Unary, &Status::Success),
        1
    );
    assert_eq!(
        service
            .metrics
            .get_request_counter("llama-7b", &RequestType::Unary, &Status::Error),
        0
    );
    assert_eq!(service.metrics.get_inflight_count("llama-7b"), 0);

    let exposition = client
        .get(format!("{}/metrics", service.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(exposition.contains("relay_http_service_requests_total"));
    assert!(exposition.contains("relay_http_service_request_duration_seconds"));
}
