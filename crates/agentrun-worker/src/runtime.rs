//! The worker runtime loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentrun_bus::{BusError, Envelope, Message, MessageBus, COORDINATOR_ADDR};
use agentrun_core::{CapabilitySet, Task, TaskId, TaskResult, TaskStatus, WorkerId, WorkerStatus};
use agentrun_ralph::RalphLoop;

/// Worker runtime errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Worker tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable worker identity.
    pub id: WorkerId,
    /// Capabilities advertised at registration.
    pub capabilities: CapabilitySet,
    /// Concurrent task slots.
    pub capacity: u32,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    /// Config with a generated id.
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            id: WorkerId::generate(),
            capabilities,
            capacity: 1,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// How many finished results are retained for duplicate-dispatch
/// redelivery.
const FINISHED_HISTORY: usize = 32;

struct WorkerState {
    /// Tasks in flight, each with its cancellation token.
    running: HashMap<TaskId, CancellationToken>,
    /// Results for recently finished tasks, kept for redelivery.
    finished: HashMap<TaskId, TaskResult>,
    /// Finish order, oldest first, for history eviction.
    finished_order: VecDeque<TaskId>,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            running: HashMap::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
        }
    }

    /// Remember a result for redelivery, evicting the oldest entries
    /// once the history is full.
    fn remember_finished(&mut self, result: TaskResult) {
        let task_id = result.task_id.clone();
        if self.finished.insert(task_id.clone(), result).is_none() {
            self.finished_order.push_back(task_id);
        }
        while self.finished.len() > FINISHED_HISTORY {
            match self.finished_order.pop_front() {
                Some(old) => {
                    self.finished.remove(&old);
                }
                None => break,
            }
        }
    }
}

/// A worker: one bus address, one execution loop.
pub struct Worker {
    config: WorkerConfig,
    bus: Arc<dyn MessageBus>,
    executor: Arc<RalphLoop>,
    state: Arc<Mutex<WorkerState>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, bus: Arc<dyn MessageBus>, executor: Arc<RalphLoop>) -> Self {
        Self {
            config,
            bus,
            executor,
            state: Arc::new(Mutex::new(WorkerState::new())),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.config.id
    }

    /// Run until a shutdown message arrives.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let address = self.config.id.as_str().to_owned();
        let mut rx = self.bus.subscribe(&address).await?;

        // Identity is announced exactly once; everything after this is
        // heartbeats and task traffic.
        self.bus
            .send(
                COORDINATOR_ADDR,
                Message::Register {
                    worker_id: self.config.id.clone(),
                    capabilities: self.config.capabilities.clone(),
                    capacity: self.config.capacity,
                },
            )
            .await?;
        info!(worker_id = %self.config.id, "Worker registered");

        let heartbeat = self.spawn_heartbeat();

        while let Some(envelope) = rx.recv().await {
            match envelope.message.clone() {
                Message::Dispatch { task, resume_from } => {
                    self.handle_dispatch(&envelope, task, resume_from).await;
                }
                Message::Cancel { task_id } => {
                    let state = self.state.lock().await;
                    match state.running.get(&task_id) {
                        Some(token) => {
                            info!(worker_id = %self.config.id, task_id = %task_id, "Cancelling task");
                            token.cancel();
                        }
                        None => {
                            warn!(worker_id = %self.config.id, task_id = %task_id, "Cancel for a task not running here");
                        }
                    }
                }
                Message::Shutdown => {
                    info!(worker_id = %self.config.id, "Shutting down");
                    for token in self.state.lock().await.running.values() {
                        token.cancel();
                    }
                    let _ = self
                        .bus
                        .respond(
                            &envelope,
                            Message::Ack {
                                accepted: true,
                                detail: None,
                            },
                        )
                        .await;
                    break;
                }
                other => {
                    warn!(worker_id = %self.config.id, kind = other.kind(), "Unexpected message");
                }
            }
        }

        heartbeat.abort();
        self.bus.unsubscribe(&address).await;
        Ok(())
    }

    async fn handle_dispatch(
        &self,
        envelope: &Envelope,
        task: Task,
        resume_from: Option<agentrun_core::Checkpoint>,
    ) {
        let mut state = self.state.lock().await;

        // Redelivery of a finished task: re-acknowledge and re-report
        // instead of running it again.
        if let Some(result) = state.finished.get(&task.id).cloned() {
            drop(state);
            info!(worker_id = %self.config.id, task_id = %task.id, "Duplicate dispatch, resending result");
            let _ = self
                .bus
                .respond(
                    envelope,
                    Message::Ack {
                        accepted: true,
                        detail: Some("already completed".to_string()),
                    },
                )
                .await;
            let _ = self
                .bus
                .send(
                    COORDINATOR_ADDR,
                    Message::Completed {
                        worker_id: self.config.id.clone(),
                        result,
                    },
                )
                .await;
            return;
        }

        if state.running.len() as u32 >= self.config.capacity {
            drop(state);
            let _ = self
                .bus
                .respond(
                    envelope,
                    Message::Ack {
                        accepted: false,
                        detail: Some("at capacity".to_string()),
                    },
                )
                .await;
            return;
        }

        let cancel = CancellationToken::new();
        state.running.insert(task.id.clone(), cancel.clone());
        drop(state);

        let _ = self
            .bus
            .respond(
                envelope,
                Message::Ack {
                    accepted: true,
                    detail: None,
                },
            )
            .await;

        info!(worker_id = %self.config.id, task_id = %task.id, resumed = resume_from.is_some(), "Task accepted");

        let bus = self.bus.clone();
        let executor = self.executor.clone();
        let worker_id = self.config.id.clone();
        let shared = self.state.clone();

        tokio::spawn(async move {
            let _ = bus
                .send(
                    COORDINATOR_ADDR,
                    Message::StatusReport {
                        worker_id: worker_id.clone(),
                        task_id: task.id.clone(),
                        status: TaskStatus::Running,
                    },
                )
                .await;

            let result = executor.run(&task, resume_from, &cancel).await;

            {
                let mut state = shared.lock().await;
                state.running.remove(&task.id);
                state.remember_finished(result.clone());
            }

            if let Err(err) = bus
                .send(
                    COORDINATOR_ADDR,
                    Message::Completed { worker_id, result },
                )
                .await
            {
                warn!(task_id = %task.id, error = %err, "Failed to report completion");
            }
        });
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        let worker_id = self.config.id.clone();
        let shared = self.state.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (status, current_task) = {
                    let state = shared.lock().await;
                    match state.running.keys().next() {
                        Some(task_id) => (WorkerStatus::Busy, Some(task_id.clone())),
                        None => (WorkerStatus::Idle, None),
                    }
                };
                if let Err(err) = bus
                    .send(
                        COORDINATOR_ADDR,
                        Message::Heartbeat {
                            worker_id: worker_id.clone(),
                            status,
                            current_task,
                        },
                    )
                    .await
                {
                    warn!(worker_id = %worker_id, error = %err, "Heartbeat delivery failed");
                }
            }
        })
    }
}
