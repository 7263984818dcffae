// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Relay gateway daemon.
//!
//! Boots the HTTP service with a local mock fleet so the gateway is
//! exercisable out of the box: two mock GPUs of different capability plus a
//! cloud fallback, a seeded development API key, and the registry reaper.
//! `SIGINT`/`SIGTERM` drain in-flight requests before exit.

use std::sync::Arc;

use relay_gateway::http::HttpService;
use relay_gateway::worker::MockWorker;
use relay_gateway::GatewayConfig;
use relay_runtime::{logging, Result, Runtime, Worker};

/// Development API key seeded into the ledger at boot.
const DEV_API_KEY: &str = "test-key-123";
const DEV_API_KEY_BALANCE: i64 = 100;

const GIB: u64 = 1024 * 1024 * 1024;

fn main() -> Result<()> {
    logging::init();
    let worker = Worker::from_settings()?;
    worker.execute(app)
}

async fn app(runtime: Runtime) -> Result<()> {
    let config = GatewayConfig::from_settings()?;

    let service = HttpService::builder()
        .port(config.port)
        .stream_token_ceiling(config.stream_token_ceiling)
        .vram_weight(config.vram_weight)
        .load_weight(config.load_weight)
        .build()?;

    service.limiter().grant(DEV_API_KEY, DEV_API_KEY_BALANCE);
    tracing::info!(api_key = DEV_API_KEY, balance = DEV_API_KEY_BALANCE, "seeded development ledger");

    let registry = service.registry();
    for worker in mock_fleet() {
        let profile = worker.profile();
        tracing::info!(worker_id = %profile.worker_id, "registering mock worker");
        registry.register_worker(worker, profile);
    }

    let reaper = registry.clone().spawn_reaper(runtime.child_token());

    let result = service.run(runtime.primary_token()).await;

    runtime.shutdown();
    let _ = reaper.await;

    result
}

/// The local development fleet: a 12 GiB GPU, a 6 GiB GPU and a cloud
/// fallback that accepts any model.
fn mock_fleet() -> Vec<Arc<MockWorker>> {
    vec![
        Arc::new(MockWorker::new(
            "gpu-4070tis-01",
            vec!["gpt-3.5-turbo", "gpt-4", "llama-7b", "llama-13b"],
            12 * GIB,
            2,
        )),
        Arc::new(MockWorker::new(
            "gpu-2060-01",
            vec!["gpt-3.5-turbo", "llama-7b"],
            6 * GIB,
            1,
        )),
        Arc::new(MockWorker::new("cloud-fallback", vec!["*"], 0, 100)),
    ]
}
