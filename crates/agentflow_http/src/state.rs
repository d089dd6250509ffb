//! Shared state for the HTTP control plane (spec.md §4.8, §6).

use std::sync::Arc;
use std::time::Instant;

use agentflow_heartbeat::Heartbeat;
use agentflow_queue::GroupQueue;
use agentflow_resource::ResourceStats;
use agentflow_scheduler::TaskStore;

use agentflow_logging::ErrorRing;

/// Read access to the current `ResourceMonitor` snapshot, without exposing
/// the `&mut self` that `update()` requires (spec.md §4.1 `stats()`).
pub trait ResourceStatsSource: Send + Sync {
    fn stats(&self) -> ResourceStats;
}

/// Lists the groups currently registered with the process (spec.md §6
/// `GET /status` → `registeredGroups[]`).
pub trait GroupRegistry: Send + Sync {
    fn group_folders(&self) -> Vec<String>;
}

/// Everything the axum router needs, handed in by `agentflow`'s binary at
/// startup (spec.md §4.8 "pure read/mutate over DB + runtime registries").
#[derive(Clone)]
pub struct AppState {
    pub started_at: Instant,
    pub version: &'static str,
    pub task_store: Arc<dyn TaskStore>,
    pub queue: GroupQueue,
    pub resources: Arc<dyn ResourceStatsSource>,
    pub groups: Arc<dyn GroupRegistry>,
    pub errors: ErrorRing,
    /// `None` until the heartbeat loop has been started (spec.md §6
    /// `POST /heartbeat/ping` → 503 "if not registered").
    pub heartbeat: Option<Arc<Heartbeat>>,
}

impl AppState {
    pub fn new(
        version: &'static str,
        task_store: Arc<dyn TaskStore>,
        queue: GroupQueue,
        resources: Arc<dyn ResourceStatsSource>,
        groups: Arc<dyn GroupRegistry>,
        errors: ErrorRing,
        heartbeat: Option<Arc<Heartbeat>>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            version,
            task_store,
            queue,
            resources,
            groups,
            errors,
            heartbeat,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
