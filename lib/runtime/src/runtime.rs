// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [Runtime] is the handle through which components access shared process
//! resources: the thread pool and the root cancellation token. Cancelling the
//! root token (see [`Runtime::shutdown`]) terminates every component holding a
//! [`Runtime::child_token`].

use super::{Result, Runtime, RuntimeType};
use crate::config::RuntimeConfig;

use std::sync::Arc;

pub use tokio_util::sync::CancellationToken;

impl Runtime {
    fn new(runtime: RuntimeType) -> Runtime {
        Runtime {
            id: Arc::new(uuid::Uuid::new_v4().to_string()),
            primary: runtime,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Wrap an externally owned [`tokio::runtime::Handle`].
    pub fn from_handle(handle: tokio::runtime::Handle) -> Runtime {
        Runtime::new(RuntimeType::External(handle))
    }

    /// Wrap the runtime of the current async context.
    pub fn from_current() -> Result<Runtime> {
        Ok(Runtime::from_handle(tokio::runtime::Handle::current()))
    }

    /// Create a [`Runtime`] from [`RuntimeConfig`] settings sourced from the
    /// environment.
    pub fn from_settings() -> Result<Runtime> {
        let config = RuntimeConfig::from_settings()?;
        let owned = RuntimeType::Shared(Arc::new(config.create_runtime()?));
        Ok(Runtime::new(owned))
    }

    /// Unique identifier for this [`Runtime`] instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// [`tokio::runtime::Handle`] for the application thread pool.
    pub fn primary(&self) -> tokio::runtime::Handle {
        self.primary.handle()
    }

    /// The root [`CancellationToken`] of the process.
    pub fn primary_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// A child [`CancellationToken`] tied to the root token's life-cycle.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    /// Cancel the root token, shutting down every attached component.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}

impl RuntimeType {
    pub fn handle(&self) -> tokio::runtime::Handle {
        match self {
            RuntimeType::External(handle) => handle.clone(),
            RuntimeType::Shared(rt) => rt.handle().clone(),
        }
    }
}

impl std::fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::External(_) => write!(f, "RuntimeType::External"),
            RuntimeType::Shared(_) => write!(f, "RuntimeType::Shared"),
        }
    }
}
