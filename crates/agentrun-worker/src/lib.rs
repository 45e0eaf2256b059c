//! AgentRun Worker
//!
//! A worker registers on the bus once at startup, heartbeats on an
//! interval, and executes one dispatched task at a time through a fresh
//! [`RalphLoop`] run. All task state lives in the dispatch payload and
//! the checkpoint store; losing a worker loses no task state.

pub mod runtime;

pub use runtime::{Worker, WorkerConfig, WorkerError};
