//! AgentRun Ralph Loop
//!
//! A bounded plan/act/verify loop over the endpoint pool. Progress is
//! checkpointed after every iteration so tasks survive worker loss, and
//! every exit path produces a [`agentrun_core::TaskResult`] with a
//! machine-readable reason.

pub mod engine;
pub mod store;
pub mod tools;

pub use engine::{LoopConfig, ModelClient, RalphLoop, DONE_MARKER, STEP_MARKER};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, StoreError};
pub use tools::{NoTools, ToolError, ToolExecutor};
