//! Worker supervisor: spawns and stops worker runtimes.
//!
//! Workers run as isolated tokio tasks that only talk to the rest of
//! the system over the bus. Swapping this supervisor for one that
//! spawns OS processes requires no change to the coordinator or the
//! workers themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use agentrun_bus::MessageBus;
use agentrun_core::{CapabilitySet, WorkerId};
use agentrun_ralph::{CheckpointStore, LoopConfig, ModelClient, RalphLoop, ToolExecutor};
use agentrun_worker::{Worker, WorkerConfig};

/// Everything a new worker needs.
pub struct WorkerTemplate {
    pub bus: Arc<dyn MessageBus>,
    pub model: Arc<dyn ModelClient>,
    pub tools: Arc<dyn ToolExecutor>,
    pub store: Arc<dyn CheckpointStore>,
    pub loop_config: LoopConfig,
    pub capabilities: CapabilitySet,
    pub heartbeat_interval: Duration,
}

/// Spawns worker runtimes and tracks their join handles.
pub struct WorkerSupervisor {
    template: WorkerTemplate,
    handles: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
}

impl WorkerSupervisor {
    pub fn new(template: WorkerTemplate) -> Self {
        Self {
            template,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn one worker and return its id. The worker registers itself
    /// over the bus; the registry learns about it from that message,
    /// not from us.
    pub async fn spawn(&self) -> WorkerId {
        let config = WorkerConfig {
            id: WorkerId::generate(),
            capabilities: self.template.capabilities.clone(),
            capacity: 1,
            heartbeat_interval: self.template.heartbeat_interval,
        };
        let id = config.id.clone();

        let executor = Arc::new(RalphLoop::new(
            self.template.model.clone(),
            self.template.tools.clone(),
            self.template.store.clone(),
            self.template.loop_config.clone(),
        ));
        let worker = Worker::new(config, self.template.bus.clone(), executor);

        let worker_id = id.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = worker.run().await {
                error!(worker_id = %worker_id, error = %err, "Worker runtime failed");
            }
        });

        info!(worker_id = %id, "Worker spawned");
        self.handles.lock().await.insert(id.clone(), handle);
        id
    }

    /// Forcibly stop a worker task. Used for workers that stopped
    /// heartbeating; cooperative shutdown goes over the bus instead.
    pub async fn reap(&self, id: &WorkerId) {
        if let Some(handle) = self.handles.lock().await.remove(id) {
            handle.abort();
            info!(worker_id = %id, "Worker reaped");
        }
    }

    /// Forget a worker that exited on its own.
    pub async fn forget(&self, id: &WorkerId) {
        self.handles.lock().await.remove(id);
    }

    /// Number of workers the supervisor is tracking.
    pub async fn spawned_count(&self) -> usize {
        self.handles.lock().await.len()
    }
}
