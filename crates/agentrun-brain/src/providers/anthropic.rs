//! Anthropic messages API adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointConfig;
use crate::error::BrainError;
use crate::providers::ProviderAdapter;
use crate::types::{
    ChatMessage, ChatRequest, NormalizedResponse, Role, StopReason, TokenUsage, ToolInvocation,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Adapter for endpoints speaking the Anthropic messages protocol.
pub struct AnthropicAdapter {
    client: Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn build_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
        let mut system = None;
        let mut wire = Vec::new();

        for msg in messages {
            match msg.role {
                // The system prompt is a separate request parameter.
                Role::System => system = Some(msg.content.clone()),
                Role::User => wire.push(WireMessage {
                    role: "user".to_string(),
                    content: WireContent::Text(msg.content.clone()),
                }),
                Role::Assistant => wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: WireContent::Text(msg.content.clone()),
                }),
                Role::Tool => wire.push(WireMessage {
                    role: "user".to_string(),
                    content: WireContent::Blocks(vec![WireBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                }),
            }
        }

        (system, wire)
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Extended-thinking block; dropped during normalization.
    Thinking {
        thinking: String,
    },
    /// Any block type this adapter does not understand.
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn split_blocks(blocks: Vec<WireBlock>) -> (String, Vec<ToolInvocation>) {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            WireBlock::Text { text } => text_parts.push(text),
            WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolInvocation {
                id,
                name,
                arguments: input,
            }),
            WireBlock::ToolResult { .. } | WireBlock::Thinking { .. } | WireBlock::Other => {}
        }
    }
    (text_parts.join("\n"), tool_calls)
}

fn parse_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::Other,
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<NormalizedResponse, BrainError> {
        let (system, messages) = Self::build_messages(&request.messages);

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.parameters.clone(),
                    })
                    .collect(),
            )
        };

        let wire_request = WireRequest {
            model: endpoint.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(endpoint.max_tokens),
            system,
            temperature: request.temperature,
            tools,
        };

        let base_url = endpoint.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let response = self
            .client
            .post(format!("{base_url}/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|source| BrainError::Network {
                endpoint: endpoint.name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrainError::from_status(&endpoint.name, status.as_u16(), body));
        }

        let wire: WireResponse =
            response
                .json()
                .await
                .map_err(|e| BrainError::MalformedResponse {
                    endpoint: endpoint.name.clone(),
                    message: e.to_string(),
                })?;

        let (text, tool_calls) = split_blocks(wire.content);

        Ok(NormalizedResponse {
            text,
            tool_calls,
            stop_reason: parse_stop_reason(wire.stop_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: wire.usage.input_tokens,
                output_tokens: wire.usage.output_tokens,
            },
            endpoint: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_is_split_out() {
        let (system, wire) = AnthropicAdapter::build_messages(&[
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
        ]);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn test_thinking_blocks_are_dropped() {
        let raw = r#"{
            "content": [
                {"type": "thinking", "thinking": "carry the one", "signature": "abc"},
                {"type": "text", "text": "4"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        }"#;
        let wire: WireResponse = serde_json::from_str(raw).unwrap();
        let (text, tool_calls) = split_blocks(wire.content);
        assert_eq!(text, "4");
        assert!(tool_calls.is_empty());
    }

    #[test]
    fn test_unknown_block_type_is_tolerated() {
        let raw = r#"{"type": "redacted_thinking", "data": "opaque"}"#;
        let block: WireBlock = serde_json::from_str(raw).unwrap();
        assert!(matches!(block, WireBlock::Other));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(parse_stop_reason(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(parse_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(parse_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(parse_stop_reason(None), StopReason::Other);
    }
}
