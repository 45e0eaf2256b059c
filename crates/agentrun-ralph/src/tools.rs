//! Tool execution seam for the loop.

use async_trait::async_trait;
use thiserror::Error;

use agentrun_brain::{ToolInvocation, ToolSpec};

/// A failed tool execution. The loop records this as an observation and
/// keeps going; tools never abort a task on their own.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

/// Executes tool invocations requested by the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The tools offered to the model.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Run one invocation and return its textual result.
    async fn execute(&self, invocation: &ToolInvocation) -> Result<String, ToolError>;
}

/// Executor that offers no tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        Err(ToolError(format!("unknown tool: {}", invocation.name)))
    }
}
