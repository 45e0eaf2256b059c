//! End-to-end orchestration scenarios over an in-process bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agentrun_brain::{
    BrainError, ChatRequest, NormalizedResponse, StopReason, TokenUsage,
};
use agentrun_bus::{LocalBus, Message};
use agentrun_coordinator::{AgentRegistry, Coordinator, WorkerSupervisor, WorkerTemplate};
use agentrun_core::{
    Capability, CapabilitySet, ComplexityHint, OrchestratorConfig, ReasonCode, TaskPayload,
    TaskStatus, WorkerId, WorkerStatus,
};
use agentrun_ralph::{LoopConfig, MemoryCheckpointStore, ModelClient, NoTools, RalphLoop};

/// Model that completes every task on the second call (plan, then done).
struct CompletingModel;

#[async_trait]
impl ModelClient for CompletingModel {
    async fn chat(
        &self,
        request: &ChatRequest,
        _required: &CapabilitySet,
    ) -> Result<NormalizedResponse, BrainError> {
        // The planning prompt asks for a plan; everything after that
        // can finish.
        let text = if request.tools.is_empty() && request.messages[0].content.contains("numbered plan")
        {
            "1. answer".to_string()
        } else {
            "TASK_COMPLETE all done".to_string()
        };
        Ok(NormalizedResponse {
            text,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
            endpoint: "test".to_string(),
        })
    }
}

struct Harness {
    coordinator: Arc<Coordinator>,
    registry: Arc<AgentRegistry>,
    store: Arc<MemoryCheckpointStore>,
}

fn harness(config: OrchestratorConfig) -> Harness {
    let bus = Arc::new(LocalBus::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let model: Arc<dyn ModelClient> = Arc::new(CompletingModel);
    let loop_config = LoopConfig {
        max_iterations: config.max_iterations,
        error_budget: config.error_budget,
        ..Default::default()
    };

    let capabilities = CapabilitySet::text_only().with(Capability::ToolUse);
    let supervisor = Arc::new(WorkerSupervisor::new(WorkerTemplate {
        bus: bus.clone(),
        model: model.clone(),
        tools: Arc::new(NoTools),
        store: store.clone(),
        loop_config: loop_config.clone(),
        capabilities: capabilities.clone(),
        heartbeat_interval: config.heartbeat_interval,
    }));
    let local_executor = Arc::new(RalphLoop::new(
        model,
        Arc::new(NoTools),
        store.clone(),
        loop_config,
    ));

    let coordinator = Coordinator::new(
        config,
        bus.clone(),
        registry.clone(),
        supervisor,
        store.clone(),
        capabilities,
        local_executor,
    );

    Harness {
        coordinator,
        registry,
        store,
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        min_workers: 1,
        max_workers: 3,
        heartbeat_interval: Duration::from_millis(50),
        missed_threshold: 3,
        control_tick_interval: Duration::from_millis(50),
        scale_up_queue_depth: 2,
        dispatch_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn wait_terminal(coordinator: &Arc<Coordinator>, task_id: &agentrun_core::TaskId) -> agentrun_core::TaskResult {
    for _ in 0..200 {
        if let Some(view) = coordinator.get_status(task_id).await {
            if let Some(result) = view.result {
                return result;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn test_complex_task_runs_on_worker_end_to_end() {
    let h = harness(fast_config());
    let shutdown = CancellationToken::new();
    let run = {
        let coordinator = h.coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    let task_id = h
        .coordinator
        .submit(TaskPayload::new("a long multi step job").with_complexity(ComplexityHint::Complex))
        .await
        .unwrap();

    let result = wait_terminal(&h.coordinator, &task_id).await;
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.reason, ReasonCode::Done);
    assert_eq!(result.output.as_deref(), Some("all done"));

    // The worker, not the coordinator, executed it.
    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_simple_task_runs_locally() {
    let h = harness(fast_config());

    // No run loop at all: local execution needs no workers.
    let task_id = h
        .coordinator
        .submit(TaskPayload::new("short job").with_complexity(ComplexityHint::Simple))
        .await
        .unwrap();

    let result = wait_terminal(&h.coordinator, &task_id).await;
    assert_eq!(result.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_complex_task_falls_back_to_local_without_workers() {
    let mut config = fast_config();
    config.min_workers = 0;
    config.max_workers = 0;
    let h = harness(config);

    // Complex, so it queues rather than running locally at submit.
    let task_id = h
        .coordinator
        .submit(TaskPayload::new("no pool for this one").with_complexity(ComplexityHint::Complex))
        .await
        .unwrap();
    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Pending);

    // With no workers and nowhere to scale, the control loop must run
    // the task locally instead of stranding it in the queue.
    h.coordinator.control_tick().await;

    let result = wait_terminal(&h.coordinator, &task_id).await;
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.output.as_deref(), Some("all done"));
}

#[tokio::test]
async fn test_submit_rejects_uncoverable_capabilities() {
    let h = harness(fast_config());

    let payload = TaskPayload::new("describe this video")
        .with_capabilities(CapabilitySet::new().with(Capability::Video));
    let err = h.coordinator.submit(payload).await.unwrap_err();
    assert!(err.to_string().contains("video"));
}

#[tokio::test]
async fn test_duplicate_result_is_ignored() {
    let h = harness(fast_config());

    let task_id = h
        .coordinator
        .submit(TaskPayload::new("short job").with_complexity(ComplexityHint::Simple))
        .await
        .unwrap();
    let first = wait_terminal(&h.coordinator, &task_id).await;
    assert_eq!(first.status, TaskStatus::Completed);

    // A late duplicate with a different outcome changes nothing.
    h.coordinator
        .accept_result(
            None,
            agentrun_core::TaskResult::failed(task_id.clone(), ReasonCode::WorkerLost, "late", 0),
        )
        .await;

    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result.unwrap().reason, ReasonCode::Done);
}

#[tokio::test]
async fn test_cancel_queued_task() {
    let h = harness(fast_config());

    // No workers and no control loop, so the task stays queued.
    let task_id = h
        .coordinator
        .submit(TaskPayload::new("queued job").with_complexity(ComplexityHint::Complex))
        .await
        .unwrap();

    h.coordinator.cancel(&task_id).await.unwrap();
    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Cancelled);
    assert_eq!(view.result.unwrap().reason, ReasonCode::Cancelled);
}

#[tokio::test]
async fn test_lost_worker_task_is_requeued_and_finishes() {
    let h = harness(fast_config());

    // Fake a registered worker that will never answer dispatches.
    let ghost = WorkerId::new("ghost-worker");
    h.registry
        .register(ghost.clone(), CapabilitySet::text_only().with(Capability::ToolUse), 1)
        .await;

    let task_id = h
        .coordinator
        .submit(TaskPayload::new("survives worker loss").with_complexity(ComplexityHint::Complex))
        .await
        .unwrap();

    // Dispatch attempts hit the ghost and fail; the task stays queued.
    h.coordinator.control_tick().await;
    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Pending);

    // Declare the ghost dead by aging its heartbeat past the deadline,
    // then start the real loop; a healthy worker picks the task up.
    h.registry.remove(&ghost).await;

    let shutdown = CancellationToken::new();
    let run = {
        let coordinator = h.coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    let result = wait_terminal(&h.coordinator, &task_id).await;
    assert_eq!(result.status, TaskStatus::Completed);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_heartbeat_loss_requeues_held_task() {
    let h = harness(fast_config());

    // A worker that registered, took a task, then went silent.
    let silent = WorkerId::new("silent-worker");
    h.registry
        .register(silent.clone(), CapabilitySet::text_only().with(Capability::ToolUse), 1)
        .await;

    let task_id = h
        .coordinator
        .submit(TaskPayload::new("held by silent worker").with_complexity(ComplexityHint::Complex))
        .await
        .unwrap();

    // Hand-mark the dispatch as if the worker had accepted it.
    h.coordinator
        .handle_message(Message::Heartbeat {
            worker_id: silent.clone(),
            status: WorkerStatus::Busy,
            current_task: Some(task_id.clone()),
        })
        .await;
    {
        // Drain the queue entry the submit created; the task now lives
        // on the silent worker as far as the coordinator knows.
        let view = h.coordinator.get_status(&task_id).await.unwrap();
        assert_eq!(view.status, TaskStatus::Pending);
    }

    // Wait past the heartbeat deadline, then tick: the sweep must mark
    // the worker unhealthy and requeue its task in the same tick.
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.coordinator.control_tick().await;

    let view = h.coordinator.get_status(&task_id).await.unwrap();
    assert_ne!(view.status, TaskStatus::Dispatched);

    let record = h.registry.get(&silent).await.unwrap();
    assert!(!record.status.can_accept());
}

#[tokio::test]
async fn test_scale_up_under_queue_pressure() {
    let mut config = fast_config();
    config.min_workers = 1;
    config.max_workers = 3;
    config.scale_up_queue_depth = 2;
    let h = harness(config);

    let shutdown = CancellationToken::new();
    let run = {
        let coordinator = h.coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            h.coordinator
                .submit(
                    TaskPayload::new(format!("bulk job {i}"))
                        .with_complexity(ComplexityHint::Complex),
                )
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        let result = wait_terminal(&h.coordinator, id).await;
        assert_eq!(result.status, TaskStatus::Completed);
    }

    // Queue pressure forced the pool beyond the minimum.
    let seen = h.registry.list().await.len();
    assert!(seen > 1, "expected scale-up, saw {seen} workers");

    // With the queue drained the pool shrinks back to the minimum.
    let mut live = h.registry.live_count().await;
    for _ in 0..200 {
        live = h.registry.live_count().await;
        if live <= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(live, 1, "expected scale-down to min_workers");

    shutdown.cancel();
    run.await.unwrap().unwrap();

    // Nothing terminal leaves a checkpoint behind.
    assert!(h.store.is_empty().await);
}
