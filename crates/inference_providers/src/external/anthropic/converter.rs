//! Anthropic format converter
//!
//! Converts between the normalized (OpenAI-shaped) types and Anthropic's
//! Messages API:
//! - Request conversion (system extraction, image sources, tool blocks)
//! - Response parsing (text, tool_use and thinking blocks)
//! - Streaming event mapping with per-block tool call state

use crate::capabilities::ProviderCapabilities;
use crate::chunk_builder::ChunkContext;
use crate::classifier::ErrorContext;
use crate::errors::ProviderError;
use crate::mapping::{
    gate_limits, gate_range, lenient, lenient_vec, minimal_response, new_completion_id,
    now_timestamp, passthrough_extras, STANDARD_CHAT_FIELDS,
};
use crate::models::{
    ChatCompletionChunk, ChatCompletionParams, ChatCompletionResponse,
    ChatCompletionResponseChoice, ChatMessage, ChatResponseMessage, ContentPart, FinishReason,
    FunctionCall, MessageContent, MessageRole, TokenUsage, ToolCall, ToolChoice, ToolDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Output budget when the caller sets none; the Messages API requires one
pub const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Native request fields that `extra` must not shadow
const ANTHROPIC_RESERVED_FIELDS: &[&str] = &["system", "stop_sequences", "metadata"];

// =============================================================================
// Anthropic Request Types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnthropicMetadata>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicToolChoice {
    Auto,
    Any,
    None,
    Tool { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMetadata {
    pub user_id: String,
}

// =============================================================================
// Anthropic Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    content: Vec<AnthropicResponseBlock>,
    #[serde(default, deserialize_with = "lenient")]
    stop_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: i32,
    #[serde(default)]
    output_tokens: i32,
    #[serde(default)]
    cache_read_input_tokens: Option<i32>,
}

impl AnthropicUsage {
    fn into_token_usage(self) -> TokenUsage {
        let mut usage = TokenUsage::new(self.input_tokens, self.output_tokens);
        usage.prompt_tokens_details = self
            .cache_read_input_tokens
            .map(|cached| serde_json::json!({ "cached_tokens": cached }));
        usage
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

/// Split a `data:<mime>;base64,<payload>` URI
fn parse_data_uri(url: &str) -> Option<(&str, &str)> {
    url.strip_prefix("data:")?.split_once(";base64,")
}

fn convert_content(content: &MessageContent) -> Vec<AnthropicBlock> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![AnthropicBlock::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => AnthropicBlock::Text { text: text.clone() },
                ContentPart::ImageUrl { image_url } => {
                    let source = match parse_data_uri(&image_url.url) {
                        Some((media_type, data)) => AnthropicImageSource::Base64 {
                            media_type: media_type.to_string(),
                            data: data.to_string(),
                        },
                        None => AnthropicImageSource::Url {
                            url: image_url.url.clone(),
                        },
                    };
                    AnthropicBlock::Image { source }
                }
            })
            .collect(),
    }
}

/// Convert normalized messages to Anthropic's system string and turns
///
/// System messages are hoisted out and joined; tool results travel as user
/// turns; consecutive turns with the same role are merged because the API
/// requires alternation.
pub fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut converted: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            MessageRole::System => {
                if let Some(content) = &msg.content {
                    let text = content.text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
                continue;
            }
            MessageRole::User => (
                "user",
                msg.content.as_ref().map(convert_content).unwrap_or_default(),
            ),
            MessageRole::Assistant => {
                let mut blocks = msg.content.as_ref().map(convert_content).unwrap_or_default();
                for call in msg.tool_calls.iter().flatten() {
                    let input = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| Value::Object(Map::new()));
                    blocks.push(AnthropicBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }
                ("assistant", blocks)
            }
            MessageRole::Tool => (
                "user",
                vec![AnthropicBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.as_ref().map(MessageContent::text).unwrap_or_default(),
                }],
            ),
        };

        if blocks.is_empty() {
            continue;
        }

        match converted.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => converted.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, converted)
}

pub fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: tool.function.parameters.clone(),
        })
        .collect()
}

pub fn convert_tool_choice(tool_choice: &ToolChoice) -> AnthropicToolChoice {
    match tool_choice {
        ToolChoice::String(choice) => match choice.as_str() {
            "none" => AnthropicToolChoice::None,
            "required" => AnthropicToolChoice::Any,
            _ => AnthropicToolChoice::Auto,
        },
        ToolChoice::Function { function, .. } => AnthropicToolChoice::Tool {
            name: function.name.clone(),
        },
    }
}

/// Build the Messages API request for `provider_model`
pub fn build_request(
    params: &ChatCompletionParams,
    provider_model: &str,
    caps: &ProviderCapabilities,
    stream: bool,
) -> Result<AnthropicRequest, ProviderError> {
    let chat = &caps.chat;
    let provider = caps.id;

    let temperature = gate_range("temperature", params.temperature, chat.temperature, provider)?;
    let mut top_p = gate_range("top_p", params.top_p, chat.top_p, provider)?;
    // Newer Claude models reject requests that set both
    if temperature.is_some() && top_p.take().is_some() {
        tracing::debug!(provider, parameter = "top_p", "Dropping top_p in favour of temperature");
    }
    let top_k = gate_range("top_k", params.top_k.map(|k| k as f32), chat.top_k, provider)?
        .and(params.top_k);
    let (stop_sequences, max_tokens) = gate_limits(params, chat, provider)?;

    for (name, present) in [
        ("frequency_penalty", params.frequency_penalty.is_some()),
        ("presence_penalty", params.presence_penalty.is_some()),
        ("seed", params.seed.is_some()),
        ("logit_bias", params.logit_bias.is_some()),
        ("response_format", params.response_format.is_some()),
        ("n", params.n.is_some_and(|n| n > 1)),
    ] {
        if present {
            tracing::debug!(provider, parameter = name, "Dropping unsupported parameter");
        }
    }

    let (system, messages) = convert_messages(&params.messages);
    let tools = params
        .tools
        .as_deref()
        .filter(|tools| !tools.is_empty())
        .map(convert_tools);
    let tool_choice = params
        .tool_choice
        .as_ref()
        .filter(|_| tools.is_some())
        .map(convert_tool_choice);

    let mut extra = passthrough_extras(&params.extra, STANDARD_CHAT_FIELDS);
    extra.retain(|key, _| !ANTHROPIC_RESERVED_FIELDS.contains(&key.as_str()));

    Ok(AnthropicRequest {
        model: provider_model.to_string(),
        messages,
        max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature,
        top_p,
        top_k,
        stop_sequences,
        tools,
        tool_choice,
        metadata: params.user.clone().map(|user_id| AnthropicMetadata { user_id }),
        stream,
        extra,
    })
}

pub fn map_stop_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Map a Messages API body; never fails
pub fn map_response(body: &[u8], alias: &str, provider_model: &str) -> ChatCompletionResponse {
    let wire = match serde_json::from_slice::<AnthropicResponse>(body) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(
                model = %provider_model,
                error = %e,
                "Unparseable Anthropic response body, returning minimal response"
            );
            return minimal_response(None, alias, provider_model);
        }
    };

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    for block in wire.content {
        match block {
            AnthropicResponseBlock::Text { text: part } => text.push_str(&part),
            AnthropicResponseBlock::Thinking { thinking } => reasoning.push_str(&thinking),
            AnthropicResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                type_: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            AnthropicResponseBlock::Other => {}
        }
    }

    let mut response = minimal_response(wire.id, alias, provider_model);
    response.choices = vec![ChatCompletionResponseChoice {
        index: 0,
        message: ChatResponseMessage {
            role: MessageRole::Assistant,
            content: (!text.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            refusal: None,
            reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        },
        finish_reason: wire.stop_reason.as_deref().map(map_stop_reason),
    }];
    response.usage = wire.usage.map(AnthropicUsage::into_token_usage);
    response
}

// =============================================================================
// Streaming Events & State
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: i64,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: i64,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: i64,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<AnthropicUsageDelta>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicUsageDelta {
    #[serde(default)]
    output_tokens: i32,
}

#[derive(Debug, Deserialize)]
pub struct StreamErrorBody {
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    message: String,
}

/// Per-stream state: identity, token counts and open tool blocks
pub struct AnthropicStreamState {
    ctx: ChunkContext,
    error_ctx: ErrorContext,
    input_tokens: i32,
    output_tokens: i32,
    /// content block index -> tool call index
    tool_blocks: HashMap<i64, i64>,
    next_tool_index: i64,
}

impl AnthropicStreamState {
    pub fn new(alias: &str, provider_model: &str, error_ctx: ErrorContext) -> Self {
        Self {
            ctx: ChunkContext::new(
                new_completion_id(),
                alias.to_string(),
                provider_model.to_string(),
                now_timestamp(),
            ),
            error_ctx,
            input_tokens: 0,
            output_tokens: 0,
            tool_blocks: HashMap::new(),
            next_tool_index: 0,
        }
    }

    /// Translate one event; `None` for events with no client-visible effect
    pub fn map_event(
        &mut self,
        event: AnthropicStreamEvent,
    ) -> Option<Result<ChatCompletionChunk, ProviderError>> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(id) = message.id {
                    self.ctx.id = id;
                }
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
                Some(Ok(self.ctx.role_chunk()))
            }

            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::ToolUse { id, name },
            } => {
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_blocks.insert(index, tool_index);
                Some(Ok(self.ctx.tool_call_start_chunk(tool_index, id, name)))
            }

            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => Some(Ok(self.ctx.text_chunk(text))),
                BlockDelta::ThinkingDelta { thinking } => {
                    Some(Ok(self.ctx.reasoning_chunk(thinking)))
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    let tool_index = *self.tool_blocks.get(&index)?;
                    Some(Ok(self.ctx.tool_call_args_chunk(tool_index, partial_json)))
                }
                BlockDelta::Other => None,
            },

            AnthropicStreamEvent::ContentBlockStop { index } => {
                self.tool_blocks.remove(&index);
                None
            }

            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
                let finish_reason = delta.stop_reason.as_deref().map(map_stop_reason);
                let usage = TokenUsage::new(self.input_tokens, self.output_tokens);
                Some(Ok(self.ctx.finish_chunk(finish_reason, Some(usage))))
            }

            AnthropicStreamEvent::Error { error } => {
                tracing::warn!(
                    provider = %self.error_ctx.provider,
                    error_type = %error.type_,
                    "Stream error received"
                );
                let mut err = ProviderError::communication(format!(
                    "provider '{}' reported an error mid-stream: {}: {}",
                    self.error_ctx.provider, error.type_, error.message
                ))
                .with_context(&self.error_ctx.provider, &self.error_ctx.model);
                if error.type_ == "rate_limit_error" {
                    err = err.with_rate_limited();
                }
                Some(Err(err))
            }

            AnthropicStreamEvent::ContentBlockStart { .. }
            | AnthropicStreamEvent::MessageStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities;
    use crate::errors::ErrorKind;
    use crate::models::{FunctionChoice, ImageDetail};
    use serde_json::json;

    fn params(messages: Vec<ChatMessage>) -> ChatCompletionParams {
        ChatCompletionParams::new("claude", messages)
    }

    // ==================== Request Conversion Tests ====================

    #[test]
    fn test_convert_messages_hoists_and_joins_system() {
        let (system, messages) = convert_messages(&[
            ChatMessage::system("Be terse."),
            ChatMessage::user("Hi"),
            ChatMessage::system("Answer in French."),
        ]);
        assert_eq!(system.as_deref(), Some("Be terse.\n\nAnswer in French."));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_tool_round_trip_blocks() {
        let mut assistant = ChatMessage::assistant("Checking.");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "toolu_1".to_string(),
            type_: "function".to_string(),
            function: FunctionCall {
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris"}"#.to_string(),
            },
        }]);
        let (_, messages) = convert_messages(&[
            ChatMessage::user("Weather?"),
            assistant,
            ChatMessage::tool_result("toolu_1", "18C"),
        ]);

        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[1].content[1],
            AnthropicBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Paris"}),
            }
        );
        assert_eq!(messages[2].role, "user");
        assert_eq!(
            messages[2].content[0],
            AnthropicBlock::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: "18C".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_tool_arguments_become_empty_object() {
        let mut assistant = ChatMessage::assistant("");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "t".to_string(),
            type_: "function".to_string(),
            function: FunctionCall {
                name: "f".to_string(),
                arguments: "not json".to_string(),
            },
        }]);
        let (_, messages) = convert_messages(&[assistant]);
        assert_eq!(messages[0].content.len(), 1);
        match &messages[0].content[0] {
            AnthropicBlock::ToolUse { input, .. } => assert_eq!(input, &json!({})),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_consecutive_same_role_turns_merge() {
        let (_, messages) = convert_messages(&[
            ChatMessage::tool_result("a", "1"),
            ChatMessage::tool_result("b", "2"),
            ChatMessage::user("thanks"),
        ]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.len(), 3);
    }

    #[test]
    fn test_image_sources() {
        let (_, messages) = convert_messages(&[ChatMessage::user(MessageContent::Parts(vec![
            ContentPart::text("What is this?"),
            ContentPart::image("data:image/png;base64,iVBORw0K", None),
            ContentPart::image("https://example.com/cat.jpg", Some(ImageDetail::High)),
        ]))]);
        let blocks = &messages[0].content;
        assert_eq!(
            blocks[1],
            AnthropicBlock::Image {
                source: AnthropicImageSource::Base64 {
                    media_type: "image/png".to_string(),
                    data: "iVBORw0K".to_string(),
                }
            }
        );
        assert_eq!(
            serde_json::to_value(&blocks[2]).unwrap(),
            json!({
                "type": "image",
                "source": {"type": "url", "url": "https://example.com/cat.jpg"}
            })
        );
    }

    #[test]
    fn test_tool_choice_mapping() {
        assert_eq!(
            convert_tool_choice(&ToolChoice::String("required".to_string())),
            AnthropicToolChoice::Any
        );
        assert_eq!(
            convert_tool_choice(&ToolChoice::String("none".to_string())),
            AnthropicToolChoice::None
        );
        assert_eq!(
            serde_json::to_value(convert_tool_choice(&ToolChoice::Function {
                type_: "function".to_string(),
                function: FunctionChoice {
                    name: "lookup".to_string()
                },
            }))
            .unwrap(),
            json!({"type": "tool", "name": "lookup"})
        );
    }

    #[test]
    fn test_build_request_defaults_and_gating() {
        let caps = capabilities::find("anthropic").unwrap();
        let mut p = params(vec![ChatMessage::system("sys"), ChatMessage::user("Hi")]);
        p.seed = Some(7);
        p.top_k = Some(40);
        p.stop = Some(vec!["END".to_string()]);
        p.user = Some("user-42".to_string());
        p.extra.insert("system".to_string(), json!("sneaky"));

        let request = build_request(&p, "claude-3-5-sonnet-20241022", caps, false).unwrap();
        let wire = serde_json::to_value(&request).unwrap();

        assert_eq!(wire["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(wire["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(wire["system"], "sys");
        assert_eq!(wire["top_k"], 40);
        assert_eq!(wire["stop_sequences"], json!(["END"]));
        assert_eq!(wire["metadata"]["user_id"], "user-42");
        assert!(wire.get("seed").is_none());
        assert!(wire.get("stream").is_none());
    }

    #[test]
    fn test_build_request_rejects_out_of_range_temperature() {
        let caps = capabilities::find("anthropic").unwrap();
        let mut p = params(vec![ChatMessage::user("Hi")]);
        p.temperature = Some(1.5);
        let err = build_request(&p, "claude-3-haiku-20240307", caps, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("temperature"));
    }

    #[test]
    fn test_build_request_prefers_temperature_over_top_p() {
        let caps = capabilities::find("anthropic").unwrap();
        let mut p = params(vec![ChatMessage::user("Hi")]);
        p.temperature = Some(0.5);
        p.top_p = Some(0.9);
        let request = build_request(&p, "claude-sonnet-4-5", caps, false).unwrap();
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.top_p, None);

        p.temperature = None;
        let request = build_request(&p, "claude-sonnet-4-5", caps, false).unwrap();
        assert_eq!(request.top_p, Some(0.9));
    }

    // ==================== Response Mapping Tests ====================

    #[test]
    fn test_map_response_with_tool_use_and_thinking() {
        let body = json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "User wants weather.", "signature": "abc"},
                {"type": "text", "text": "Let me check."},
                {
                    "type": "tool_use",
                    "id": "toolu_9",
                    "name": "get_weather",
                    "input": {"city": "Oslo"}
                }
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 11, "cache_read_input_tokens": 5}
        });
        let response = map_response(body.to_string().as_bytes(), "claude", "claude-3-7-sonnet");

        assert_eq!(response.id, "msg_01");
        assert_eq!(response.model, "claude");
        assert_eq!(response.provider_model.as_deref(), Some("claude-3-7-sonnet"));
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.message.content.as_deref(), Some("Let me check."));
        assert_eq!(
            choice.message.reasoning_content.as_deref(),
            Some("User wants weather.")
        );
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(call.function.arguments, r#"{"city":"Oslo"}"#);

        let usage = response.usage.unwrap();
        assert_eq!(usage.total_tokens, 31);
        assert_eq!(usage.prompt_tokens_details, Some(json!({"cached_tokens": 5})));
    }

    #[test]
    fn test_map_response_tolerates_garbage() {
        let response = map_response(b"<html>oops</html>", "claude", "claude-3-haiku");
        assert!(response.choices.is_empty());
        assert_eq!(response.model, "claude");
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), FinishReason::Stop);
        assert_eq!(map_stop_reason("stop_sequence"), FinishReason::Stop);
        assert_eq!(map_stop_reason("max_tokens"), FinishReason::Length);
        assert_eq!(map_stop_reason("refusal"), FinishReason::ContentFilter);
        assert_eq!(map_stop_reason("pause_turn"), FinishReason::Other);
    }

    // ==================== Stream Mapping Tests ====================

    fn event(value: Value) -> AnthropicStreamEvent {
        serde_json::from_value(value).unwrap()
    }

    fn state() -> AnthropicStreamState {
        AnthropicStreamState::new(
            "claude",
            "claude-3-5-sonnet-20241022",
            ErrorContext::new("anthropic", "claude-3-5-sonnet-20241022"),
        )
    }

    #[test]
    fn test_stream_text_and_finish() {
        let mut s = state();
        let start = s
            .map_event(event(json!({
                "type": "message_start",
                "message": {"id": "msg_7", "usage": {"input_tokens": 12, "output_tokens": 1}}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(start.id, "msg_7");

        assert!(s
            .map_event(event(json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            })))
            .is_none());
        let text = s
            .map_event(event(json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Hello"}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(text.id, "msg_7");
        assert_eq!(text.choices[0].delta.as_ref().unwrap().content.as_deref(), Some("Hello"));
        assert!(s.map_event(event(json!({"type": "ping"}))).is_none());

        let finish = s
            .map_event(event(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"output_tokens": 6}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(finish.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(finish.usage.unwrap().total_tokens, 18);
        assert!(s.map_event(event(json!({"type": "message_stop"}))).is_none());
    }

    #[test]
    fn test_stream_tool_calls_get_sequential_indices() {
        let mut s = state();
        let first = s
            .map_event(event(json!({
                "type": "content_block_start", "index": 1,
                "content_block": {
                    "type": "tool_use", "id": "toolu_a", "name": "search", "input": {}
                }
            })))
            .unwrap()
            .unwrap();
        let args = s
            .map_event(event(json!({
                "type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}
            })))
            .unwrap()
            .unwrap();
        s.map_event(event(json!({"type": "content_block_stop", "index": 1})));
        let second = s
            .map_event(event(json!({
                "type": "content_block_start", "index": 2,
                "content_block": {"type": "tool_use", "id": "toolu_b", "name": "fetch", "input": {}}
            })))
            .unwrap()
            .unwrap();

        let call = |chunk: &ChatCompletionChunk| {
            chunk.choices[0].delta.as_ref().unwrap().tool_calls.as_ref().unwrap()[0].clone()
        };
        assert_eq!(call(&first).index, 0);
        assert_eq!(call(&args).index, 0);
        assert_eq!(
            call(&args).function.unwrap().arguments.as_deref(),
            Some("{\"q\":")
        );
        assert_eq!(call(&second).index, 1);
        assert_eq!(call(&second).id.as_deref(), Some("toolu_b"));
    }

    #[test]
    fn test_stream_json_delta_for_closed_block_is_dropped() {
        let mut s = state();
        assert!(s
            .map_event(event(json!({
                "type": "content_block_delta", "index": 4,
                "delta": {"type": "input_json_delta", "partial_json": "{}"}
            })))
            .is_none());
    }

    #[test]
    fn test_stream_error_event() {
        let mut s = state();
        let err = s
            .map_event(event(json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.is_rate_limited());
        assert!(err.message().contains("slow down"));
        assert_eq!(err.provider(), Some("anthropic"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut s = state();
        assert!(s
            .map_event(event(json!({"type": "future_event", "payload": 1})))
            .is_none());
    }
}
