//! The execution loop: plan, act, verify, repeat until done or bounded
//! out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentrun_brain::{
    BrainError, ChatMessage, ChatRequest, EndpointPool, NormalizedResponse,
};
use agentrun_core::{
    CapabilitySet, Checkpoint, EntryKind, Plan, ReasonCode, StepStatus, Task, TaskResult,
    TranscriptEntry,
};

use crate::store::CheckpointStore;
use crate::tools::ToolExecutor;

/// Marker the model emits when the whole task is finished.
pub const DONE_MARKER: &str = "TASK_COMPLETE";

/// Marker the model emits when the current plan step is finished.
pub const STEP_MARKER: &str = "STEP_COMPLETE";

/// Loop tunables.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard cap on loop iterations.
    pub max_iterations: u32,
    /// Consecutive model failures tolerated before the task fails.
    pub error_budget: u32,
    /// How many recent transcript entries go into each prompt.
    pub transcript_window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            error_budget: 3,
            transcript_window: 20,
        }
    }
}

/// The loop's view of the model. Implemented by [`EndpointPool`]; tests
/// substitute scripted models.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(
        &self,
        request: &ChatRequest,
        required: &CapabilitySet,
    ) -> Result<NormalizedResponse, BrainError>;
}

#[async_trait]
impl ModelClient for EndpointPool {
    async fn chat(
        &self,
        request: &ChatRequest,
        required: &CapabilitySet,
    ) -> Result<NormalizedResponse, BrainError> {
        EndpointPool::chat(self, request, required).await
    }
}

/// The bounded plan/act/verify loop.
///
/// One model call per iteration. Every iteration ends with a checkpoint
/// save, so a crashed worker loses at most the iteration in flight.
/// Cancellation is only observed at iteration boundaries; an iteration
/// that has started always runs to its end.
pub struct RalphLoop {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolExecutor>,
    store: Arc<dyn CheckpointStore>,
    config: LoopConfig,
}

impl RalphLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        store: Arc<dyn CheckpointStore>,
        config: LoopConfig,
    ) -> Self {
        Self {
            model,
            tools,
            store,
            config,
        }
    }

    /// Run `task` to a terminal result.
    ///
    /// An explicit `resume_from` checkpoint wins over anything in the
    /// store; otherwise the store is consulted so a restarted worker
    /// picks up where the previous one stopped.
    pub async fn run(
        &self,
        task: &Task,
        resume_from: Option<Checkpoint>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let mut checkpoint = match resume_from {
            Some(cp) => cp,
            None => match self.store.load(&task.id).await {
                Ok(Some(cp)) => {
                    info!(task_id = %task.id, iteration = cp.iteration, "Resuming from stored checkpoint");
                    cp
                }
                Ok(None) => Checkpoint::new(task.id.clone()),
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "Checkpoint load failed, starting fresh");
                    Checkpoint::new(task.id.clone())
                }
            },
        };

        let mut consecutive_errors: u32 = 0;

        while checkpoint.iteration < self.config.max_iterations {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, iteration = checkpoint.iteration, "Cancelled at iteration boundary");
                self.persist(&checkpoint).await;
                return TaskResult::cancelled(task.id.clone(), checkpoint.iteration);
            }

            let request = self.build_request(task, &checkpoint);
            let response = match self
                .model
                .chat(&request, &task.payload.required_capabilities)
                .await
            {
                Ok(response) => {
                    consecutive_errors = 0;
                    response
                }
                Err(err) => {
                    checkpoint.record(TranscriptEntry::new(
                        checkpoint.iteration,
                        EntryKind::Note,
                        format!("model call failed: {err}"),
                    ));

                    // The pool already exhausted its own recovery for
                    // these; iterating again cannot help.
                    let fatal_reason = match &err {
                        BrainError::NoCapableEndpoint { .. } => Some(ReasonCode::NoCapableEndpoint),
                        BrainError::AllEndpointsFailed { .. } => {
                            Some(ReasonCode::AllEndpointsFailed)
                        }
                        _ => None,
                    };
                    if let Some(reason) = fatal_reason {
                        self.persist(&checkpoint).await;
                        return TaskResult::failed(
                            task.id.clone(),
                            reason,
                            err.to_string(),
                            checkpoint.iteration,
                        );
                    }

                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.error_budget {
                        self.persist(&checkpoint).await;
                        return TaskResult::failed(
                            task.id.clone(),
                            ReasonCode::ErrorBudget,
                            err.to_string(),
                            checkpoint.iteration,
                        );
                    }

                    checkpoint.iteration += 1;
                    self.persist(&checkpoint).await;
                    continue;
                }
            };

            checkpoint.record(TranscriptEntry::new(
                checkpoint.iteration,
                EntryKind::Response,
                response.text.clone(),
            ));

            if checkpoint.plan.is_empty() {
                checkpoint.plan = parse_plan(&response.text, &task.payload.description);
                debug!(task_id = %task.id, steps = checkpoint.plan.steps.len(), "Plan established");
            } else {
                for call in &response.tool_calls {
                    // An invocation already in the transcript ran before
                    // this checkpoint was handed over; never re-issue it.
                    if checkpoint.has_entry(&call.id) {
                        debug!(task_id = %task.id, invocation = %call.id, "Tool call already executed, skipping");
                        continue;
                    }
                    let observation = match self.tools.execute(call).await {
                        Ok(result) => result,
                        // Tool failures feed back as observations; only
                        // the model failing can end the task.
                        Err(err) => format!("tool error: {err}"),
                    };
                    checkpoint.record(
                        TranscriptEntry::new(checkpoint.iteration, EntryKind::ToolCall, observation)
                            .with_id(call.id.clone())
                            .with_tool(call.name.clone()),
                    );
                }

                if response.text.contains(STEP_MARKER) {
                    if let Some(index) = checkpoint.plan.next_pending().map(|s| s.index) {
                        checkpoint.plan.set_status(index, StepStatus::Completed);
                    }
                }
            }

            if response.text.contains(DONE_MARKER) {
                checkpoint.iteration += 1;
                let output = response.text.replace(DONE_MARKER, "").trim().to_string();
                if let Err(err) = self.store.remove(&task.id).await {
                    warn!(task_id = %task.id, error = %err, "Checkpoint cleanup failed");
                }
                info!(task_id = %task.id, iterations = checkpoint.iteration, "Task complete");
                return TaskResult::completed(task.id.clone(), output, checkpoint.iteration);
            }

            checkpoint.iteration += 1;
            self.persist(&checkpoint).await;
        }

        // Out of iterations. The checkpoint stays so the task can be
        // resumed with a higher budget.
        self.persist(&checkpoint).await;
        TaskResult::failed(
            task.id.clone(),
            ReasonCode::MaxIterations,
            format!("no completion after {} iterations", checkpoint.iteration),
            checkpoint.iteration,
        )
    }

    async fn persist(&self, checkpoint: &Checkpoint) {
        if let Err(err) = self.store.save(checkpoint).await {
            warn!(task_id = %checkpoint.task_id, error = %err, "Checkpoint save failed");
        }
    }

    fn build_request(&self, task: &Task, checkpoint: &Checkpoint) -> ChatRequest {
        let mut messages = Vec::new();

        if checkpoint.plan.is_empty() {
            messages.push(ChatMessage::system(
                "You are an autonomous task executor. Produce a short numbered plan \
                 for the task, one step per line. Do not start working yet.",
            ));
        } else {
            messages.push(ChatMessage::system(format!(
                "You are an autonomous task executor working through a plan. \
                 Use the available tools when needed. When the current step is \
                 finished, say {STEP_MARKER}. When the whole task is finished, \
                 say {DONE_MARKER} followed by the final answer.",
            )));
        }

        for ctx in &task.payload.context {
            match ctx.role.as_str() {
                "assistant" => messages.push(ChatMessage::assistant(ctx.content.clone())),
                _ => messages.push(ChatMessage::user(ctx.content.clone())),
            }
        }

        let mut prompt = format!("Task: {}\n", task.payload.description);
        if !checkpoint.plan.is_empty() {
            prompt.push_str("\nPlan:\n");
            for step in &checkpoint.plan.steps {
                let mark = match step.status {
                    StepStatus::Completed => "x",
                    StepStatus::Skipped => "-",
                    StepStatus::InProgress => ">",
                    StepStatus::Pending => " ",
                    StepStatus::Failed | StepStatus::Cancelled => "!",
                };
                prompt.push_str(&format!("[{mark}] {}. {}\n", step.index + 1, step.description));
            }
            if let Some(step) = checkpoint.plan.next_pending() {
                prompt.push_str(&format!("\nCurrent step: {}\n", step.description));
            } else {
                prompt.push_str("\nAll steps are done. Produce the final answer.\n");
            }
        }

        let tail_start = checkpoint
            .transcript
            .len()
            .saturating_sub(self.config.transcript_window);
        if tail_start < checkpoint.transcript.len() {
            prompt.push_str("\nRecent history:\n");
            for entry in &checkpoint.transcript[tail_start..] {
                match &entry.tool_name {
                    Some(tool) => prompt.push_str(&format!("[{tool}] {}\n", entry.content)),
                    None => prompt.push_str(&format!("{}\n", entry.content)),
                }
            }
        }

        messages.push(ChatMessage::user(prompt));

        let mut request = ChatRequest::new(messages);
        if !checkpoint.plan.is_empty() {
            request = request.with_tools(self.tools.specs());
        }
        request
    }
}

/// Parse a numbered or bulleted plan out of the model's text. Falls
/// back to a single step covering the whole task.
fn parse_plan(text: &str, fallback: &str) -> Plan {
    let steps: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let rest = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| {
                    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                    if digits == 0 {
                        return None;
                    }
                    line[digits..]
                        .strip_prefix('.')
                        .or_else(|| line[digits..].strip_prefix(')'))
                })?;
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect();

    if steps.is_empty() {
        Plan::from_descriptions([fallback.to_string()])
    } else {
        Plan::from_descriptions(steps)
    }
}
