//! The coordinator: owns tasks, routes work, supervises the pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentrun_bus::{BusError, Message, MessageBus, COORDINATOR_ADDR};
use agentrun_core::{
    CapabilitySet, ComplexityHint, CoreError, OrchestratorConfig, ReasonCode, Task, TaskId,
    TaskPayload, TaskResult, TaskStatus, WorkerId,
};
use agentrun_ralph::{CheckpointStore, RalphLoop};

use crate::registry::AgentRegistry;
use crate::supervisor::WorkerSupervisor;

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no configured endpoint covers capabilities {required}")]
    NoCapableEndpoint { required: CapabilitySet },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Caller-facing snapshot of one task.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Present once the task is terminal.
    pub result: Option<TaskResult>,
}

/// The orchestration core. Owns every task from submission to terminal
/// result; workers only ever see the task they were handed.
pub struct Coordinator {
    config: OrchestratorConfig,
    bus: Arc<dyn MessageBus>,
    registry: Arc<AgentRegistry>,
    supervisor: Arc<WorkerSupervisor>,
    store: Arc<dyn CheckpointStore>,
    /// Union of endpoint capabilities, used to fail submissions fast.
    pool_capabilities: CapabilitySet,
    /// Loop used for tasks routed to local execution.
    local_executor: Arc<RalphLoop>,

    tasks: RwLock<HashMap<TaskId, Task>>,
    queue: Mutex<VecDeque<TaskId>>,
    results: RwLock<HashMap<TaskId, TaskResult>>,
    local_cancels: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        bus: Arc<dyn MessageBus>,
        registry: Arc<AgentRegistry>,
        supervisor: Arc<WorkerSupervisor>,
        store: Arc<dyn CheckpointStore>,
        pool_capabilities: CapabilitySet,
        local_executor: Arc<RalphLoop>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            registry,
            supervisor,
            store,
            pool_capabilities,
            local_executor,
            tasks: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            results: RwLock::new(HashMap::new()),
            local_cancels: Mutex::new(HashMap::new()),
        })
    }

    /// Accept a task. Fails immediately when no endpoint can ever cover
    /// the required capabilities; queueing such a task would strand it.
    pub async fn submit(self: &Arc<Self>, payload: TaskPayload) -> Result<TaskId, CoordinatorError> {
        payload.validate()?;
        if !self
            .pool_capabilities
            .is_superset_of(&payload.required_capabilities)
        {
            return Err(CoordinatorError::NoCapableEndpoint {
                required: payload.required_capabilities,
            });
        }

        let run_locally = self.is_simple(&payload);
        let mut task = Task::new(payload);
        let task_id = task.id.clone();

        if run_locally {
            task.mark_running();
            info!(task_id = %task_id, "Task accepted for local execution");
            self.tasks.write().await.insert(task_id.clone(), task.clone());
            self.spawn_local(task).await;
        } else {
            info!(task_id = %task_id, "Task accepted and queued");
            self.tasks.write().await.insert(task_id.clone(), task);
            self.queue.lock().await.push_back(task_id.clone());
        }

        Ok(task_id)
    }

    /// Snapshot of a task's status and, once terminal, its result.
    pub async fn get_status(&self, task_id: &TaskId) -> Option<TaskView> {
        let task = self.tasks.read().await.get(task_id).cloned()?;
        let result = self.results.read().await.get(task_id).cloned();
        Some(TaskView {
            id: task.id,
            status: task.status,
            result,
        })
    }

    /// Request cancellation. Queued tasks finish immediately; running
    /// tasks stop at their next iteration boundary.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<(), CoordinatorError> {
        enum Route {
            AlreadyTerminal,
            Queued,
            OnWorker(WorkerId),
            Local,
        }

        let route = {
            let tasks = self.tasks.read().await;
            let task = tasks
                .get(task_id)
                .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.clone()))?;
            if task.is_terminal() {
                Route::AlreadyTerminal
            } else if task.status == TaskStatus::Pending {
                Route::Queued
            } else if let Some(worker) = &task.assigned_worker {
                Route::OnWorker(worker.clone())
            } else {
                Route::Local
            }
        };

        match route {
            Route::AlreadyTerminal => {}
            Route::Queued => {
                self.queue.lock().await.retain(|id| id != task_id);
                self.accept_result(None, TaskResult::cancelled(task_id.clone(), 0))
                    .await;
            }
            Route::OnWorker(worker) => {
                info!(task_id = %task_id, worker_id = %worker, "Forwarding cancel to worker");
                self.bus
                    .send(worker.as_str(), Message::Cancel { task_id: task_id.clone() })
                    .await?;
            }
            Route::Local => {
                if let Some(token) = self.local_cancels.lock().await.get(task_id) {
                    info!(task_id = %task_id, "Cancelling local task");
                    token.cancel();
                }
            }
        }
        Ok(())
    }

    /// Run until `shutdown` fires: consume bus traffic, tick the control
    /// loop, keep the worker pool at strength.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
        let mut rx = self.bus.subscribe(COORDINATOR_ADDR).await?;

        for _ in 0..self.config.min_workers {
            self.supervisor.spawn().await;
        }

        let mut tick = tokio::time::interval(self.config.control_tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Coordinator shutting down");
                    let _ = self.bus.broadcast(COORDINATOR_ADDR, Message::Shutdown).await;
                    break;
                }
                _ = tick.tick() => {
                    self.control_tick().await;
                }
                maybe = rx.recv() => {
                    match maybe {
                        Some(envelope) => self.handle_message(envelope.message).await,
                        None => break,
                    }
                }
            }
        }

        self.bus.unsubscribe(COORDINATOR_ADDR).await;
        Ok(())
    }

    /// Apply one inbound bus message.
    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::Register {
                worker_id,
                capabilities,
                capacity,
            } => {
                self.registry.register(worker_id, capabilities, capacity).await;
            }
            Message::Heartbeat {
                worker_id,
                status,
                current_task,
            } => {
                self.registry.heartbeat(&worker_id, status, current_task).await;
            }
            Message::StatusReport {
                task_id, status, ..
            } => {
                if status == TaskStatus::Running {
                    let mut tasks = self.tasks.write().await;
                    if let Some(task) = tasks.get_mut(&task_id) {
                        if !task.is_terminal() {
                            task.mark_running();
                        }
                    }
                }
            }
            Message::Completed { worker_id, result } => {
                self.accept_result(Some(&worker_id), result).await;
            }
            other => {
                debug!(kind = other.kind(), "Ignoring message");
            }
        }
    }

    /// One pass of the control loop: sweep heartbeats, requeue orphaned
    /// tasks, dispatch the queue, adjust pool size.
    pub async fn control_tick(self: &Arc<Self>) {
        self.sweep_lost_workers().await;
        self.dispatch_queue().await;
        self.adjust_pool().await;
    }

    /// Accept a terminal result. The first result for a task wins;
    /// duplicates from redelivery or worker races are dropped.
    pub async fn accept_result(&self, worker: Option<&WorkerId>, result: TaskResult) {
        {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&result.task_id) else {
                warn!(task_id = %result.task_id, "Result for unknown task");
                return;
            };
            if task.is_terminal() {
                debug!(task_id = %result.task_id, "Duplicate result ignored");
                return;
            }
            task.finish(result.status);
        }

        info!(
            task_id = %result.task_id,
            status = ?result.status,
            reason = ?result.reason,
            iterations = result.iterations,
            "Task finished"
        );

        if let Some(worker) = worker {
            self.registry
                .note_result(worker, result.status != TaskStatus::Completed)
                .await;
        }
        self.local_cancels.lock().await.remove(&result.task_id);
        self.results
            .write()
            .await
            .insert(result.task_id.clone(), result);
    }

    fn is_simple(&self, payload: &TaskPayload) -> bool {
        match payload.complexity {
            Some(ComplexityHint::Simple) => true,
            Some(ComplexityHint::Complex) => false,
            None => payload.description.len() <= self.config.simple_task_max_len,
        }
    }

    async fn spawn_local(self: &Arc<Self>, task: Task) {
        let token = CancellationToken::new();
        self.local_cancels
            .lock()
            .await
            .insert(task.id.clone(), token.clone());

        let coordinator = self.clone();
        tokio::spawn(async move {
            let result = coordinator.local_executor.run(&task, None, &token).await;
            coordinator.accept_result(None, result).await;
        });
    }

    async fn sweep_lost_workers(&self) {
        let lost = self
            .registry
            .sweep_heartbeats(self.config.heartbeat_deadline(), Utc::now())
            .await;

        for (worker_id, held_task) in lost {
            self.supervisor.reap(&worker_id).await;
            self.registry.terminate(&worker_id).await;
            self.requeue_orphans(&worker_id, held_task).await;
        }
    }

    /// Put a lost worker's tasks back in the queue, or fail them once
    /// their redispatch budget is spent.
    async fn requeue_orphans(&self, worker_id: &WorkerId, held_task: Option<TaskId>) {
        let mut orphans: Vec<TaskId> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| !t.is_terminal() && t.assigned_worker.as_ref() == Some(worker_id))
                .map(|t| t.id.clone())
                .collect()
        };
        if let Some(held) = held_task {
            if !orphans.contains(&held) {
                orphans.push(held);
            }
        }

        for task_id in orphans {
            let exhausted = {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&task_id) else {
                    continue;
                };
                if task.is_terminal() {
                    continue;
                }
                if task.retry_count >= self.config.max_worker_restarts {
                    true
                } else {
                    task.requeue();
                    false
                }
            };

            if exhausted {
                warn!(task_id = %task_id, "Redispatch budget exhausted");
                self.accept_result(
                    None,
                    TaskResult::failed(
                        task_id.clone(),
                        ReasonCode::WorkerLost,
                        "owning worker lost too many times",
                        0,
                    ),
                )
                .await;
            } else {
                info!(task_id = %task_id, worker_id = %worker_id, "Requeued after worker loss");
                self.queue.lock().await.push_front(task_id);
            }
        }
    }

    async fn dispatch_queue(self: &Arc<Self>) {
        loop {
            let Some(task_id) = self.queue.lock().await.pop_front() else {
                break;
            };

            let Some(task) = self.tasks.read().await.get(&task_id).cloned() else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            let Some(worker_id) = self
                .registry
                .select_worker(&task.payload.required_capabilities)
                .await
            else {
                // With the pool at its limit a worker will not appear;
                // fall back to local execution instead of stranding the
                // task.
                if self.registry.live_count().await >= self.config.max_workers {
                    info!(task_id = %task_id, "No worker available, executing locally");
                    let task = {
                        let mut tasks = self.tasks.write().await;
                        let Some(task) = tasks.get_mut(&task_id) else {
                            continue;
                        };
                        task.mark_running();
                        task.clone()
                    };
                    self.spawn_local(task).await;
                    continue;
                }
                // The pool can still grow; leave the task at the head.
                self.queue.lock().await.push_front(task_id);
                break;
            };

            // Redispatch resumes from persisted progress, if any.
            let resume_from = match self.store.load(&task_id).await {
                Ok(cp) => cp,
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "Checkpoint load failed, dispatching fresh");
                    None
                }
            };

            let dispatch = Message::Dispatch {
                task: task.clone(),
                resume_from,
            };
            match self
                .bus
                .request(worker_id.as_str(), dispatch, self.config.dispatch_timeout)
                .await
            {
                Ok(Message::Ack { accepted: true, .. }) => {
                    info!(task_id = %task_id, worker_id = %worker_id, "Task dispatched");
                    let mut tasks = self.tasks.write().await;
                    if let Some(task) = tasks.get_mut(&task_id) {
                        task.mark_dispatched(worker_id.clone());
                    }
                    drop(tasks);
                    self.registry.note_dispatch(&worker_id, task_id).await;
                }
                Ok(_) => {
                    debug!(task_id = %task_id, worker_id = %worker_id, "Dispatch declined");
                    // The worker is fuller than the registry thought.
                    self.registry.mark_busy(&worker_id).await;
                    self.queue.lock().await.push_front(task_id);
                }
                Err(err) => {
                    warn!(task_id = %task_id, worker_id = %worker_id, error = %err, "Dispatch failed");
                    self.queue.lock().await.push_front(task_id);
                    break;
                }
            }
        }
    }

    async fn adjust_pool(&self) {
        let queue_depth = self.queue.lock().await.len();
        let live = self.registry.live_count().await;

        if live < self.config.min_workers {
            self.supervisor.spawn().await;
        } else if queue_depth >= self.config.scale_up_queue_depth && live < self.config.max_workers
        {
            info!(queue_depth, live, "Scaling worker pool up");
            self.supervisor.spawn().await;
        } else if queue_depth == 0 && live > self.config.min_workers {
            if let Some(idle) = self.registry.any_idle().await {
                info!(worker_id = %idle, "Scaling worker pool down");
                let _ = self.bus.send(idle.as_str(), Message::Shutdown).await;
                self.registry.terminate(&idle).await;
                self.supervisor.forget(&idle).await;
            }
        }
    }
}
