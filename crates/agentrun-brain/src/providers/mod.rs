//! Provider adapters.
//!
//! An adapter turns the pool's neutral [`ChatRequest`] into one
//! provider's wire format and normalizes the reply. The pool picks the
//! adapter from the endpoint's protocol variant.

mod anthropic;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;

use crate::endpoint::EndpointConfig;
use crate::error::BrainError;
use crate::types::{ChatRequest, NormalizedResponse};

/// One provider protocol implementation.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Execute one chat call against `endpoint`.
    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<NormalizedResponse, BrainError>;
}
