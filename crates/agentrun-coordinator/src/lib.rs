//! AgentRun Coordinator
//!
//! The orchestration core: accepts tasks, routes them locally or to
//! workers over the bus, tracks worker health through heartbeats, and
//! keeps the pool sized to the queue. Tasks are owned here from
//! submission to terminal result.

pub mod coordinator;
pub mod registry;
pub mod supervisor;

pub use coordinator::{Coordinator, CoordinatorError, TaskView};
pub use registry::AgentRegistry;
pub use supervisor::{WorkerSupervisor, WorkerTemplate};
