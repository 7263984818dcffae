// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process runtime for the Relay gateway.
//!
//! The [Runtime] owns the Tokio thread pool and the root [`CancellationToken`]
//! from which every long-lived subsystem derives its lifecycle. The [Worker]
//! wrapper constructs the runtime from settings, traps `SIGINT`/`SIGTERM`, and
//! enforces a graceful shutdown window around the user application.

use std::sync::Arc;

pub use anyhow::{anyhow as error, Context as ErrorContext, Error, Ok as OK, Result};
pub use tokio_util::sync::CancellationToken;

mod config;
pub use config::RuntimeConfig;

pub mod logging;
pub mod runtime;
pub mod worker;
pub use worker::Worker;

/// Types of Tokio runtimes that can back a [Runtime].
#[derive(Clone)]
enum RuntimeType {
    Shared(Arc<tokio::runtime::Runtime>),
    External(tokio::runtime::Handle),
}

/// Local [Runtime] providing access to the thread pool and the root
/// [`CancellationToken`] of the process.
#[derive(Debug, Clone)]
pub struct Runtime {
    id: Arc<String>,
    primary: RuntimeType,
    cancellation_token: CancellationToken,
}
