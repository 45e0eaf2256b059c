//! Task types: payload, ownership and lifecycle.

use crate::{CapabilitySet, CoreError, ReasonCode, TaskId, TaskStatus, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A caller-declared hint about task complexity, used by the coordinator's
/// local-vs-remote routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    /// Single-shot task, fine to run on the coordinator's own loop.
    Simple,
    /// Multi-step task, prefer a dedicated worker.
    Complex,
}

/// One message of prior conversation context attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// The payload submitted by a caller. All task state a worker needs
/// travels here or in a referenced checkpoint, never in worker memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// What the task should accomplish.
    pub description: String,

    /// Prior conversation context, oldest first.
    #[serde(default)]
    pub context: Vec<ContextMessage>,

    /// Capabilities the executing endpoint must provide.
    #[serde(default)]
    pub required_capabilities: CapabilitySet,

    /// Optional caller-declared complexity hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityHint>,
}

impl TaskPayload {
    /// Create a payload with just a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            context: Vec::new(),
            required_capabilities: CapabilitySet::new(),
            complexity: None,
        }
    }

    /// Builder method to set the required capabilities.
    pub fn with_capabilities(mut self, caps: CapabilitySet) -> Self {
        self.required_capabilities = caps;
        self
    }

    /// Builder method to set the complexity hint.
    pub fn with_complexity(mut self, hint: ComplexityHint) -> Self {
        self.complexity = Some(hint);
        self
    }

    /// Reject payloads that could never execute.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.description.trim().is_empty() {
            return Err(CoreError::InvalidPayload(
                "description is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to append a context message.
    pub fn with_context(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.context.push(ContextMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }
}

/// A Task owned by the coordinator. Mutated only by the coordinator and,
/// transitively, by status reports from the owning worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// The submitted payload.
    pub payload: TaskPayload,

    /// Current task status.
    pub status: TaskStatus,

    /// Worker currently assigned, if dispatched.
    pub assigned_worker: Option<WorkerId>,

    /// Number of redispatch attempts after worker loss.
    pub retry_count: u32,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Last status mutation.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(payload: TaskPayload) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            payload,
            status: TaskStatus::Pending,
            assigned_worker: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Mark the task as dispatched to a worker.
    pub fn mark_dispatched(&mut self, worker: WorkerId) {
        self.status = TaskStatus::Dispatched;
        self.assigned_worker = Some(worker);
        self.updated_at = Utc::now();
    }

    /// Mark the task as running.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Return the task to the pending queue after its worker was lost.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.assigned_worker = None;
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    /// Move the task to a terminal status.
    pub fn finish(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The outcome of executing one task, reported back to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: TaskId,

    /// Terminal status reached.
    pub status: TaskStatus,

    /// Machine-readable reason for the terminal status.
    pub reason: ReasonCode,

    /// Final output text, if any.
    pub output: Option<String>,

    /// Error detail, if any.
    pub error: Option<String>,

    /// Loop iterations consumed.
    pub iterations: u32,
}

impl TaskResult {
    /// A successful result.
    pub fn completed(task_id: TaskId, output: impl Into<String>, iterations: u32) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            reason: ReasonCode::Done,
            output: Some(output.into()),
            error: None,
            iterations,
        }
    }

    /// A failed result with a reason code.
    pub fn failed(task_id: TaskId, reason: ReasonCode, error: impl Into<String>, iterations: u32) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            reason,
            output: None,
            error: Some(error.into()),
            iterations,
        }
    }

    /// A cancelled result.
    pub fn cancelled(task_id: TaskId, iterations: u32) -> Self {
        Self {
            task_id,
            status: TaskStatus::Cancelled,
            reason: ReasonCode::Cancelled,
            output: None,
            error: None,
            iterations,
        }
    }
}
