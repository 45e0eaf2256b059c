//! The agent registry: who is alive, what they can do, what they hold.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use agentrun_core::{CapabilitySet, TaskId, WorkerId, WorkerRecord, WorkerStatus};

/// Registry of known workers, keyed by worker id.
#[derive(Default)]
pub struct AgentRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker registration. Re-registration under the same id
    /// replaces the old record.
    pub async fn register(&self, id: WorkerId, capabilities: CapabilitySet, capacity: u32) {
        info!(worker_id = %id, capabilities = %capabilities, "Worker registered");
        let record = WorkerRecord::new(id.clone(), capabilities, capacity);
        self.workers.write().await.insert(id, record);
    }

    /// Apply a heartbeat. Returns false for workers the registry does
    /// not know, which the caller should treat as a stale sender.
    pub async fn heartbeat(
        &self,
        id: &WorkerId,
        status: WorkerStatus,
        current_task: Option<TaskId>,
    ) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(id) {
            Some(record) => {
                record.touch(status, current_task);
                true
            }
            None => {
                warn!(worker_id = %id, "Heartbeat from unknown worker");
                false
            }
        }
    }

    /// Snapshot of one worker.
    pub async fn get(&self, id: &WorkerId) -> Option<WorkerRecord> {
        self.workers.read().await.get(id).cloned()
    }

    /// Snapshot of all workers.
    pub async fn list(&self) -> Vec<WorkerRecord> {
        self.workers.read().await.values().cloned().collect()
    }

    /// Number of workers counting toward the live pool.
    pub async fn live_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.status.is_alive())
            .count()
    }

    /// Pick an idle worker able to cover `required`, preferring the one
    /// with the fewest completed tasks to spread load.
    pub async fn select_worker(&self, required: &CapabilitySet) -> Option<WorkerId> {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.has_capacity() && w.capabilities.is_superset_of(required))
            .min_by_key(|w| w.tasks_completed)
            .map(|w| w.id.clone())
    }

    /// An idle worker, used when scaling the pool down.
    pub async fn any_idle(&self) -> Option<WorkerId> {
        self.workers
            .read()
            .await
            .values()
            .find(|w| w.status == WorkerStatus::Idle && w.current_task.is_none())
            .map(|w| w.id.clone())
    }

    /// Sweep for workers whose heartbeats stopped. Workers newly past
    /// `deadline` are marked unhealthy and returned together with the
    /// task they were holding.
    pub async fn sweep_heartbeats(
        &self,
        deadline: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(WorkerId, Option<TaskId>)> {
        let deadline = chrono::Duration::from_std(deadline).unwrap_or(chrono::Duration::MAX);
        let mut lost = Vec::new();
        let mut workers = self.workers.write().await;
        for record in workers.values_mut() {
            if !record.status.is_alive() || record.status == WorkerStatus::Unhealthy {
                continue;
            }
            if record.heartbeat_age(now) > deadline {
                warn!(
                    worker_id = %record.id,
                    age_ms = record.heartbeat_age(now).num_milliseconds(),
                    "Worker heartbeats stopped"
                );
                record.status = WorkerStatus::Unhealthy;
                lost.push((record.id.clone(), record.current_task.take()));
            }
        }
        lost
    }

    /// Mark a worker as terminated and drop it from scheduling.
    pub async fn terminate(&self, id: &WorkerId) {
        if let Some(record) = self.workers.write().await.get_mut(id) {
            record.status = WorkerStatus::Terminated;
            record.current_task = None;
        }
    }

    /// Remove a worker record entirely.
    pub async fn remove(&self, id: &WorkerId) {
        self.workers.write().await.remove(id);
    }

    /// Take a worker out of scheduling until its next heartbeat says
    /// otherwise. Used when a dispatch is declined.
    pub async fn mark_busy(&self, id: &WorkerId) {
        if let Some(record) = self.workers.write().await.get_mut(id) {
            record.status = WorkerStatus::Busy;
        }
    }

    /// Note a dispatch so capacity tracking stays accurate between
    /// heartbeats.
    pub async fn note_dispatch(&self, id: &WorkerId, task_id: TaskId) {
        if let Some(record) = self.workers.write().await.get_mut(id) {
            record.status = WorkerStatus::Busy;
            record.current_task = Some(task_id);
        }
    }

    /// Note a terminal result from a worker.
    pub async fn note_result(&self, id: &WorkerId, failed: bool) {
        if let Some(record) = self.workers.write().await.get_mut(id) {
            record.current_task = None;
            record.status = WorkerStatus::Idle;
            if failed {
                record.tasks_failed += 1;
            } else {
                record.tasks_completed += 1;
            }
        }
    }
}
