//! Checkpoint types for resumable task execution.
//!
//! A checkpoint is the single source of truth for a task's progress. It
//! travels with the task on redispatch, so a replacement worker resumes
//! from the last persisted state instead of starting over.

use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step not yet attempted.
    #[default]
    Pending,
    /// Step currently being worked on.
    InProgress,
    /// Step finished successfully.
    Completed,
    /// Step deliberately passed over.
    Skipped,
    /// Step abandoned after repeated failures.
    Failed,
    /// Step cancelled along with its task.
    Cancelled,
}

/// One step of the execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Zero-based position in the plan.
    pub index: usize,
    /// What this step should accomplish.
    pub description: String,
    /// Current step status.
    pub status: StepStatus,
}

impl PlanStep {
    /// Create a new pending step.
    pub fn new(index: usize, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            status: StepStatus::Pending,
        }
    }
}

/// The execution plan produced in the loop's planning phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered steps.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from step descriptions.
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: descriptions
                .into_iter()
                .enumerate()
                .map(|(i, d)| PlanStep::new(i, d))
                .collect(),
        }
    }

    /// The first step that is not yet done or failed, if any.
    pub fn next_pending(&self) -> Option<&PlanStep> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Pending | StepStatus::InProgress))
    }

    /// Set the status of the step at `index`.
    pub fn set_status(&mut self, index: usize, status: StepStatus) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = status;
        }
    }

    /// True when every step is completed or skipped.
    pub fn all_done(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }

    /// True when the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// What produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A prompt or observation fed to the model.
    Prompt,
    /// A model response.
    Response,
    /// A tool invocation and its outcome.
    ToolCall,
    /// A note recorded by the loop itself.
    Note,
}

/// One entry of the execution transcript.
///
/// Entry ids are stable across persistence, so a resumed loop can tell
/// which actions already happened and must not be re-issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Stable entry identifier.
    pub id: String,
    /// Loop iteration that produced the entry.
    pub iteration: u32,
    /// What kind of entry this is.
    pub kind: EntryKind,
    /// Entry content.
    pub content: String,
    /// Tool name, for [`EntryKind::ToolCall`] entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Create a new entry with a generated id.
    pub fn new(iteration: u32, kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            iteration,
            kind,
            content: content.into(),
            tool_name: None,
            recorded_at: Utc::now(),
        }
    }

    /// Builder method to pin the entry id. Tool-call entries use the
    /// invocation id so a resumed loop can recognize them.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to attach a tool name.
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// A persisted snapshot of task progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The task this checkpoint belongs to.
    pub task_id: TaskId,
    /// Iterations completed so far.
    pub iteration: u32,
    /// The current plan.
    pub plan: Plan,
    /// Everything that happened, in order.
    pub transcript: Vec<TranscriptEntry>,
    /// Last time the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a fresh checkpoint for a task.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            iteration: 0,
            plan: Plan::new(),
            transcript: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append an entry and stamp the checkpoint.
    pub fn record(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
        self.updated_at = Utc::now();
    }

    /// True if an entry with this id is already in the transcript.
    pub fn has_entry(&self, id: &str) -> bool {
        self.transcript.iter().any(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_progress() {
        let mut plan = Plan::from_descriptions(["read input", "summarize", "write output"]);
        assert_eq!(plan.next_pending().map(|s| s.index), Some(0));
        assert!(!plan.all_done());

        plan.set_status(0, StepStatus::Completed);
        plan.set_status(1, StepStatus::Skipped);
        assert_eq!(plan.next_pending().map(|s| s.index), Some(2));

        plan.set_status(2, StepStatus::Completed);
        assert!(plan.all_done());
        assert!(plan.next_pending().is_none());
    }

    #[test]
    fn test_empty_plan_is_not_done() {
        assert!(!Plan::new().all_done());
    }

    #[test]
    fn test_checkpoint_records_entries() {
        let mut cp = Checkpoint::new(TaskId::new("t-1"));
        let entry = TranscriptEntry::new(1, EntryKind::ToolCall, "ran search")
            .with_id("inv-7")
            .with_tool("search");
        cp.record(entry);

        assert!(cp.has_entry("inv-7"));
        assert!(!cp.has_entry("missing"));
    }
}
