//! Worker records as tracked by the registry.

use crate::{CapabilitySet, TaskId, WorkerId, WorkerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry-side view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Stable worker identity, fixed at registration.
    pub id: WorkerId,

    /// Current worker status.
    pub status: WorkerStatus,

    /// Capabilities the worker's endpoints cover.
    pub capabilities: CapabilitySet,

    /// How many tasks the worker will run concurrently.
    pub capacity: u32,

    /// Task currently held by the worker, if any.
    pub current_task: Option<TaskId>,

    /// Last heartbeat received.
    pub last_heartbeat: DateTime<Utc>,

    /// When the worker registered.
    pub registered_at: DateTime<Utc>,

    /// Tasks completed by this worker.
    pub tasks_completed: u64,

    /// Tasks that reached a failed status on this worker.
    pub tasks_failed: u64,
}

impl WorkerRecord {
    /// Create a record for a newly registered worker.
    pub fn new(id: WorkerId, capabilities: CapabilitySet, capacity: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Idle,
            capabilities,
            capacity,
            current_task: None,
            last_heartbeat: now,
            registered_at: now,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    /// Record a heartbeat and the reported status.
    pub fn touch(&mut self, status: WorkerStatus, current_task: Option<TaskId>) {
        self.last_heartbeat = Utc::now();
        self.status = status;
        self.current_task = current_task;
    }

    /// True when the worker is idle and holding nothing.
    pub fn has_capacity(&self) -> bool {
        self.status == WorkerStatus::Idle && self.current_task.is_none()
    }

    /// Time since the last heartbeat.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }
}
