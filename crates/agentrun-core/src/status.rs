//! Status enums for Tasks and Workers, and terminal reason codes.

use serde::{Deserialize, Serialize};

/// Status of a Task in the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task accepted but not yet assigned anywhere.
    #[default]
    Pending,
    /// Task sent to a worker, awaiting a running report.
    Dispatched,
    /// Task actively executing (locally or on a worker).
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed (see the accompanying [`ReasonCode`]).
    Failed,
    /// Task was cancelled by the caller.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Machine-readable reason accompanying a terminal task status.
///
/// Callers of `get_status` always receive one of these; infrastructure
/// failures never surface as a bare error string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Task ran to completion.
    Done,
    /// No configured endpoint covers the required capabilities.
    NoCapableEndpoint,
    /// Every eligible endpoint was exhausted during execution.
    AllEndpointsFailed,
    /// The loop hit `max_iterations` without reaching done.
    MaxIterations,
    /// The per-task LLM error budget was exhausted.
    ErrorBudget,
    /// Cancelled on request.
    Cancelled,
    /// The owning worker died and the restart budget ran out.
    WorkerLost,
}

/// Status of a Worker as tracked by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker process spawned, registration not yet received.
    #[default]
    Starting,
    /// Worker is idle and ready to accept a dispatch.
    Idle,
    /// Worker is executing at least one task.
    Busy,
    /// Heartbeats stopped arriving; recovery in progress.
    Unhealthy,
    /// Worker has been shut down or permanently removed.
    Terminated,
}

impl WorkerStatus {
    /// Returns true if the worker can be offered new work.
    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    /// Returns true if the worker counts toward the live pool size.
    pub fn is_alive(&self) -> bool {
        !matches!(self, Self::Terminated)
    }
}
