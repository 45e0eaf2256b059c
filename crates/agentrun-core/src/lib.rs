//! AgentRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network transports
//! - The async runtime
//! - Any LLM provider
//!
//! All types here represent the core business domain of AgentRun: tasks,
//! checkpoints, worker records and the orchestration configuration shared
//! by the coordinator and the workers.

pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod ids;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use capability::{Capability, CapabilitySet};
pub use checkpoint::{Checkpoint, EntryKind, Plan, PlanStep, StepStatus, TranscriptEntry};
pub use config::OrchestratorConfig;
pub use error::CoreError;
pub use ids::{MessageId, TaskId, WorkerId};
pub use status::{ReasonCode, TaskStatus, WorkerStatus};
pub use task::{ComplexityHint, ContextMessage, Task, TaskPayload, TaskResult};
pub use worker::WorkerRecord;
