// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [Worker] is a convenience wrapper around the construction of the
//! [Runtime] and execution of the user application.
//!
//! [`Worker::execute`] is designed to be called once from `main` and blocks
//! the calling thread until the application completes or is cancelled. It
//! installs the signal handler trapping `SIGINT` and `SIGTERM` which triggers
//! a graceful shutdown via the root [`CancellationToken`].
//!
//! On termination, the application is given a graceful shutdown period
//! controlled by the [RELAY_GRACEFUL_SHUTDOWN_TIMEOUT] environment variable.
//! If the application does not shut down in time, the worker terminates the
//! process with exit code 911.

use super::{error, Result, Runtime, RuntimeConfig};

use futures::Future;
use once_cell::sync::OnceCell;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;

static RT: OnceCell<tokio::runtime::Runtime> = OnceCell::new();

const SHUTDOWN_MESSAGE: &str =
    "Application received shutdown signal; attempting to gracefully shutdown";
const SHUTDOWN_TIMEOUT_MESSAGE: &str =
    "Use RELAY_GRACEFUL_SHUTDOWN_TIMEOUT to control the graceful shutdown timeout";

/// Environment variable to control the graceful shutdown timeout
pub const RELAY_GRACEFUL_SHUTDOWN_TIMEOUT: &str = "RELAY_GRACEFUL_SHUTDOWN_TIMEOUT";

/// Default graceful shutdown timeout in seconds in debug mode
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_DEBUG: u64 = 5;

/// Default graceful shutdown timeout in seconds in release mode
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_RELEASE: u64 = 30;

pub struct Worker {
    runtime: Runtime,
}

impl Worker {
    /// Create a new [`Worker`] from [`RuntimeConfig`] settings sourced from
    /// the environment.
    pub fn from_settings() -> Result<Worker> {
        let config = RuntimeConfig::from_settings()?;
        Worker::from_config(config)
    }

    /// Create a new [`Worker`] from a provided [`RuntimeConfig`]
    pub fn from_config(config: RuntimeConfig) -> Result<Worker> {
        if RT.get().is_some() {
            return Err(error!("Worker already initialized"));
        }

        // two threads may pass the get() check above; only one will insert
        let rt = RT.try_insert(config.create_runtime()?).map_err(|_| {
            error!("Failed to create worker; only a single Worker should ever be created")
        })?;

        let runtime = Runtime::from_handle(rt.handle().clone());
        Ok(Worker { runtime })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Execute the provided application on the [`Runtime`], blocking the
    /// calling thread until it completes or the graceful shutdown window
    /// expires.
    pub fn execute<F, Fut>(self, f: F) -> Result<()>
    where
        F: FnOnce(Runtime) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let runtime = self.runtime;

        let timeout = std::env::var(RELAY_GRACEFUL_SHUTDOWN_TIMEOUT)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or({
                if cfg!(debug_assertions) {
                    DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_DEBUG
                } else {
                    DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_RELEASE
                }
            });

        let rt = RT.get().ok_or_else(|| error!("Worker not initialized"))?;

        rt.block_on(async move {
            tokio::spawn(signal_handler(runtime.primary_token()));

            let cancel_token = runtime.child_token();
            let mut task: JoinHandle<Result<()>> = tokio::spawn(f(runtime));

            tokio::select! {
                result = &mut task => {
                    return finish(result?);
                }

                _ = cancel_token.cancelled() => {
                    eprintln!("{SHUTDOWN_MESSAGE}");
                    eprintln!("{SHUTDOWN_TIMEOUT_MESSAGE}; currently {timeout} seconds");
                }
            }

            tokio::select! {
                result = task => {
                    finish(result?)
                }

                _ = tokio::time::sleep(tokio::time::Duration::from_secs(timeout)) => {
                    eprintln!("Application did not shutdown in time; terminating");
                    std::process::exit(911);
                }
            }
        })
    }
}

fn finish(result: Result<()>) -> Result<()> {
    match &result {
        Ok(_) => {
            tracing::info!("Application shutdown successfully");
        }
        Err(e) => {
            tracing::error!("Application shutdown with error: {:?}", e);
        }
    }
    result
}

/// Catch signals and trigger a shutdown
async fn signal_handler(cancel_token: CancellationToken) -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await?;
        anyhow::Ok(())
    };

    let sigterm = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        anyhow::Ok(())
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = sigterm => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        },
        _ = cancel_token.cancelled() => {
            tracing::info!("CancellationToken triggered; shutting down");
        },
    }

    cancel_token.cancel();

    Ok(())
}
