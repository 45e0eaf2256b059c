//! OpenAI chat-completions adapter.
//!
//! Also covers OpenAI-compatible local servers. Those frequently emit
//! reasoning and tool calls as inline `<think>` / `<tool_call>` markup
//! in the text, so the normalizer strips the former and parses the
//! latter; markup that fails to parse is kept as plain text.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::endpoint::EndpointConfig;
use crate::error::BrainError;
use crate::providers::ProviderAdapter;
use crate::types::{
    ChatMessage, ChatRequest, NormalizedResponse, Role, StopReason, TokenUsage, ToolInvocation,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for endpoints speaking the OpenAI chat-completions protocol.
pub struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn build_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                    Role::Tool => "tool".to_string(),
                },
                content: Some(m.content.clone()),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::Other,
    }
}

/// Remove `<think>...</think>` spans from the model's text.
fn strip_think_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                // Unterminated span, drop everything after the opener.
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct MarkupToolCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Extract `<tool_call>{json}</tool_call>` blocks from the text.
///
/// A block whose body is not valid JSON stays in the text so the loop
/// can still observe it.
fn extract_tool_call_markup(endpoint: &str, text: &str) -> (String, Vec<ToolInvocation>) {
    let mut out = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("<tool_call>") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + "<tool_call>".len()..];
        let Some(end) = after_open.find("</tool_call>") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let body = &after_open[..end];
        match serde_json::from_str::<MarkupToolCall>(body.trim()) {
            Ok(parsed) => calls.push(ToolInvocation {
                id: format!("markup-{}", Uuid::new_v4().simple()),
                name: parsed.name,
                arguments: parsed.arguments,
            }),
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "Unparseable tool_call markup, keeping as text");
                out.push_str(&rest[start..start + "<tool_call>".len() + end + "</tool_call>".len()]);
            }
        }
        rest = &after_open[end + "</tool_call>".len()..];
    }
    out.push_str(rest);
    (out.trim().to_string(), calls)
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<NormalizedResponse, BrainError> {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        tool_type: "function".to_string(),
                        function: WireFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let wire_request = WireRequest {
            model: endpoint.model.clone(),
            messages: Self::build_messages(&request.messages),
            max_tokens: Some(request.max_tokens.unwrap_or(endpoint.max_tokens)),
            temperature: request.temperature,
            tools,
        };

        let base_url = endpoint.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let response = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .header("Authorization", format!("Bearer {api_key}"))
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

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BrainError::MalformedResponse {
                endpoint: endpoint.name.clone(),
                message: "no choices in response".to_string(),
            })?;

        let mut tool_calls: Vec<ToolInvocation> = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            match serde_json::from_str(&call.function.arguments) {
                Ok(arguments) => tool_calls.push(ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }),
                Err(err) => {
                    warn!(
                        endpoint = %endpoint.name,
                        tool = %call.function.name,
                        error = %err,
                        "Dropping tool call with unparseable arguments"
                    );
                }
            }
        }

        let raw_text = choice.message.content.unwrap_or_default();
        let cleaned = strip_think_markup(&raw_text);
        let (text, markup_calls) = extract_tool_call_markup(&endpoint.name, &cleaned);
        tool_calls.extend(markup_calls);

        let usage = wire.usage.unwrap_or_default();
        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            parse_stop_reason(choice.finish_reason.as_deref())
        };

        Ok(NormalizedResponse {
            text,
            tool_calls,
            stop_reason,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
            endpoint: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_markup() {
        let text = "<think>working it out</think>The answer is 4.";
        assert_eq!(strip_think_markup(text), "The answer is 4.");
    }

    #[test]
    fn test_strip_unterminated_think() {
        let text = "Partial <think>never closed";
        assert_eq!(strip_think_markup(text), "Partial");
    }

    #[test]
    fn test_extract_tool_call_markup() {
        let text = r#"Let me search. <tool_call>{"name": "search", "arguments": {"q": "rust"}}</tool_call>"#;
        let (remaining, calls) = extract_tool_call_markup("ep", text);
        assert_eq!(remaining, "Let me search.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["q"], "rust");
    }

    #[test]
    fn test_unparseable_markup_stays_in_text() {
        let text = "<tool_call>not json at all</tool_call>";
        let (remaining, calls) = extract_tool_call_markup("ep", text);
        assert!(calls.is_empty());
        assert_eq!(remaining, text);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(parse_stop_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(parse_stop_reason(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(parse_stop_reason(Some("length")), StopReason::MaxTokens);
    }
}
