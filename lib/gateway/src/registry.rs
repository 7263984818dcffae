// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic worker registry with heartbeat-based liveness.
//!
//! Entries are created by [`InMemoryRegistry::register_worker`] (adapter
//! attached) or by [`InMemoryRegistry::heartbeat`] (profile-only,
//! adapter-less). Only entries with an adapter are selection candidates; the
//! background reaper removes anything whose heartbeats stop, adapter or not.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::types::WorkerProfile;
use crate::worker::Worker;

/// How often the reaper scans for dead workers.
pub const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// A worker whose `last_seen` is older than this is considered dead.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(15);

/// A registry entry: the advertised profile, the adapter used to reach the
/// worker (absent for heartbeat-only entries), and the liveness stamp.
pub struct RegisteredWorker {
    pub profile: WorkerProfile,
    pub worker: Option<Arc<dyn Worker>>,
    pub last_seen: Instant,
}

/// Thread-safe in-memory worker registry. All mutation happens under one
/// writer lock, so the reaper can never observe a half-updated entry.
pub struct InMemoryRegistry {
    workers: RwLock<HashMap<String, RegisteredWorker>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a worker's profile. An existing entry (with or without an
    /// adapter) has its profile and `last_seen` refreshed; an unknown id
    /// creates a profile-only entry that stays invisible to selection until
    /// an adapter is registered for it.
    pub fn heartbeat(&self, profile: WorkerProfile) -> Result<(), GatewayError> {
        let mut workers = self
            .workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match workers.get_mut(&profile.worker_id) {
            Some(existing) => {
                existing.profile = profile;
                existing.last_seen = Instant::now();
            }
            None => {
                workers.insert(
                    profile.worker_id.clone(),
                    RegisteredWorker {
                        profile,
                        worker: None,
                        last_seen: Instant::now(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Install or replace the adapter and profile for a worker id.
    pub fn register_worker(&self, worker: Arc<dyn Worker>, profile: WorkerProfile) {
        let mut workers = self
            .workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        workers.insert(
            profile.worker_id.clone(),
            RegisteredWorker {
                profile,
                worker: Some(worker),
                last_seen: Instant::now(),
            },
        );
    }

    /// Snapshot of all adapters currently eligible for selection. The
    /// returned vector is disjoint from internal storage.
    pub fn get_available_workers(&self) -> Vec<Arc<dyn Worker>> {
        let workers = self
            .workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        workers
            .values()
            .filter_map(|entry| entry.worker.clone())
            .collect()
    }

    /// Total number of entries, adapter-less ones included.
    pub fn worker_count(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Remove every entry whose heartbeats stopped before the liveness
    /// window. Returns the number of entries removed.
    fn reap(&self, now: Instant) -> usize {
        let mut workers = self
            .workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = workers.len();
        workers.retain(|_, entry| now.duration_since(entry.last_seen) <= LIVENESS_WINDOW);
        before - workers.len()
    }

    /// Run the reaper until `cancel` fires. After cancellation no further
    /// cleanup happens; the registry freezes until process exit.
    pub fn spawn_reaper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("registry reaper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let reaped = self.reap(Instant::now());
                        if reaped > 0 {
                            tracing::info!(reaped, "removed workers with stale heartbeats");
                        }
                    }
                }
            }
        })
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::MockWorker;

    fn profile(worker_id: &str) -> WorkerProfile {
        WorkerProfile {
            worker_id: worker_id.to_string(),
            supported: vec!["llama-7b".to_string()],
            total_vram: 12 * 1024 * 1024 * 1024,
            available_vram: 8 * 1024 * 1024 * 1024,
            active_tasks: 0,
            max_tasks: 2,
        }
    }

    fn mock(id: &str) -> Arc<MockWorker> {
        Arc::new(MockWorker::new(id, vec!["llama-7b"], 12 * 1024 * 1024 * 1024, 2))
    }

    #[tokio::test]
    async fn test_heartbeat_only_entries_are_invisible_to_selection() {
        let registry = InMemoryRegistry::new();
        registry.heartbeat(profile("ghost-01")).unwrap();

        assert_eq!(registry.worker_count(), 1);
        assert!(registry.get_available_workers().is_empty());
    }

    #[tokio::test]
    async fn test_register_then_heartbeat_keeps_adapter() {
        let registry = InMemoryRegistry::new();
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));

        let mut refreshed = profile("gpu-01");
        refreshed.active_tasks = 1;
        registry.heartbeat(refreshed).unwrap();

        let available = registry.get_available_workers();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id(), "gpu-01");
        assert_eq!(registry.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_register_replaces_existing_adapter() {
        let registry = InMemoryRegistry::new();
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));
        assert_eq!(registry.worker_count(), 1);
        assert_eq!(registry.get_available_workers().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_disjoint_from_storage() {
        let registry = InMemoryRegistry::new();
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));

        let snapshot = registry.get_available_workers();
        registry.reap(Instant::now() + LIVENESS_WINDOW + Duration::from_secs(1));

        assert_eq!(registry.worker_count(), 0);
        assert_eq!(snapshot.len(), 1, "snapshot survives registry mutation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_removes_only_stale_entries() {
        let registry = InMemoryRegistry::new();
        registry.register_worker(mock("old-01"), profile("old-01"));

        tokio::time::advance(Duration::from_secs(10)).await;
        registry.register_worker(mock("new-01"), profile("new-01"));

        // old-01 is now 10 s stale, new-01 fresh; neither is past the window
        assert_eq!(registry.reap(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        // old-01 is 16 s stale, new-01 only 6 s
        assert_eq!(registry.reap(Instant::now()), 1);
        let available = registry.get_available_workers();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id(), "new-01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_liveness() {
        let registry = InMemoryRegistry::new();
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));

        tokio::time::advance(Duration::from_secs(10)).await;
        registry.heartbeat(profile("gpu-01")).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        // 20 s since registration but only 10 s since the last heartbeat
        assert_eq!(registry.reap(Instant::now()), 0);
        assert_eq!(registry.worker_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_removes_dead_workers_within_one_cycle() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register_worker(mock("gpu-01"), profile("gpu-01"));

        let cancel = CancellationToken::new();
        let handle = registry.clone().spawn_reaper(cancel.clone());

        // let the heartbeat go stale, then give the reaper one cycle
        tokio::time::advance(LIVENESS_WINDOW + Duration::from_secs(1)).await;
        tokio::time::advance(REAP_INTERVAL).await;
        tokio::task::yield_now().await;

        assert_eq!(registry.worker_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_heartbeats_leave_one_entry() {
        let registry = Arc::new(InMemoryRegistry::new());

        let mut handles = Vec::new();
        for active_tasks in 0..8u32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut p = profile("gpu-01");
                p.active_tasks = active_tasks;
                registry.heartbeat(p).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.worker_count(), 1);
        let workers = registry
            .workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = workers.get("gpu-01").unwrap();
        assert!(entry.profile.active_tasks < 8);
    }
}
