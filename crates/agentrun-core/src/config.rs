//! Orchestrator configuration shared by the coordinator and the workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the coordinator's control loop, worker pool and the
/// per-task execution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Minimum number of live workers the supervisor maintains.
    pub min_workers: usize,

    /// Maximum number of live workers.
    pub max_workers: usize,

    /// How often workers send heartbeats.
    pub heartbeat_interval: Duration,

    /// Consecutive missed heartbeat intervals before a worker is
    /// declared unhealthy.
    pub missed_threshold: u32,

    /// How often the coordinator runs its control tick.
    pub control_tick_interval: Duration,

    /// Pending queue depth that triggers scaling up a worker.
    pub scale_up_queue_depth: usize,

    /// Worker losses a task survives before it fails with
    /// [`ReasonCode::WorkerLost`](crate::ReasonCode::WorkerLost).
    pub max_worker_restarts: u32,

    /// How long a dispatch waits for the worker's acknowledgement.
    pub dispatch_timeout: Duration,

    /// Description length at or below which an unhinted task is
    /// considered simple and run on the coordinator's own loop.
    pub simple_task_max_len: usize,

    /// Iteration cap for the execution loop.
    pub max_iterations: u32,

    /// Consecutive LLM failures tolerated within one task.
    pub error_budget: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            heartbeat_interval: Duration::from_secs(10),
            missed_threshold: 3,
            control_tick_interval: Duration::from_secs(5),
            scale_up_queue_depth: 2,
            max_worker_restarts: 3,
            dispatch_timeout: Duration::from_secs(10),
            simple_task_max_len: 200,
            max_iterations: 20,
            error_budget: 3,
        }
    }
}

impl OrchestratorConfig {
    /// Heartbeat age beyond which a worker is considered lost.
    pub fn heartbeat_deadline(&self) -> Duration {
        self.heartbeat_interval * self.missed_threshold
    }
}
