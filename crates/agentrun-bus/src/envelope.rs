//! Bus envelopes and the coordinator/worker message protocol.

use agentrun_core::{
    CapabilitySet, Checkpoint, MessageId, Task, TaskId, TaskResult, TaskStatus, WorkerId,
    WorkerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The protocol spoken over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Worker announces itself once at startup.
    Register {
        worker_id: WorkerId,
        capabilities: CapabilitySet,
        capacity: u32,
    },

    /// Periodic liveness signal from a worker.
    Heartbeat {
        worker_id: WorkerId,
        status: WorkerStatus,
        current_task: Option<TaskId>,
    },

    /// Coordinator hands a task to a worker. Carries the full task and,
    /// on redispatch, the checkpoint to resume from.
    Dispatch {
        task: Task,
        resume_from: Option<Checkpoint>,
    },

    /// Coordinator asks a worker to stop a task at the next safe point.
    Cancel { task_id: TaskId },

    /// Worker reports a non-terminal status change.
    StatusReport {
        worker_id: WorkerId,
        task_id: TaskId,
        status: TaskStatus,
    },

    /// Worker reports a terminal result.
    Completed { worker_id: WorkerId, result: TaskResult },

    /// Coordinator asks a worker to drain and exit.
    Shutdown,

    /// Generic acknowledgement, used as the reply to `Dispatch`.
    Ack {
        accepted: bool,
        detail: Option<String>,
    },
}

impl Message {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "REGISTER",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::Dispatch { .. } => "DISPATCH",
            Message::Cancel { .. } => "CANCEL",
            Message::StatusReport { .. } => "STATUS_REPORT",
            Message::Completed { .. } => "COMPLETED",
            Message::Shutdown => "SHUTDOWN",
            Message::Ack { .. } => "ACK",
        }
    }
}

/// Addressed wrapper around a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id.
    pub id: MessageId,

    /// Sender address.
    pub from: String,

    /// Destination address.
    pub to: String,

    /// Set on replies to the id of the message being answered.
    pub correlation_id: Option<MessageId>,

    /// When the envelope was created.
    pub sent_at: DateTime<Utc>,

    /// The payload.
    pub message: Message,
}

impl Envelope {
    /// Create an envelope for a fresh message.
    pub fn new(from: impl Into<String>, to: impl Into<String>, message: Message) -> Self {
        Self {
            id: MessageId::generate(),
            from: from.into(),
            to: to.into(),
            correlation_id: None,
            sent_at: Utc::now(),
            message,
        }
    }

    /// Create a reply to this envelope, addressed back to its sender.
    pub fn reply(&self, message: Message) -> Envelope {
        Envelope {
            id: MessageId::generate(),
            from: self.to.clone(),
            to: self.from.clone(),
            correlation_id: Some(self.id.clone()),
            sent_at: Utc::now(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_correlates() {
        let env = Envelope::new("coordinator", "worker-1", Message::Shutdown);
        let reply = env.reply(Message::Ack {
            accepted: true,
            detail: None,
        });
        assert_eq!(reply.correlation_id, Some(env.id.clone()));
        assert_eq!(reply.to, "coordinator");
        assert_eq!(reply.from, "worker-1");
    }

    #[test]
    fn test_message_serde_tag() {
        let msg = Message::Cancel {
            task_id: TaskId::new("t-1"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"CANCEL\""));
    }
}
