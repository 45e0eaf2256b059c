//! AgentRun Brain
//!
//! A pool of interchangeable LLM endpoints behind one `chat` call.
//! Endpoints declare capabilities and a priority; the pool routes each
//! request to the best eligible endpoint, tracks per-endpoint health,
//! and fails over when an endpoint misbehaves. Provider differences are
//! absorbed by the [`ProviderAdapter`] implementations.

pub mod endpoint;
pub mod error;
pub mod pool;
pub mod providers;
pub mod types;

pub use endpoint::{
    EndpointConfig, EndpointFile, EndpointHealth, HealthState, PoolSettings, ProtocolVariant,
};
pub use error::{BrainError, ErrorClass};
pub use pool::EndpointPool;
pub use providers::{AnthropicAdapter, OpenAiAdapter, ProviderAdapter};
pub use types::{
    ChatMessage, ChatRequest, NormalizedResponse, Role, StopReason, TokenUsage, ToolInvocation,
    ToolSpec,
};
