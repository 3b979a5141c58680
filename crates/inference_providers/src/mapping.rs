//! Stateless translation between the normalized types and the OpenAI wire
//! format spoken by most providers
//!
//! Request builders gate parameters on [`ChatParameterSupport`]; response
//! mappers are lenient and never fail on a missing or mistyped optional field.

use crate::capabilities::{
    ChatParameterSupport, MaxTokensField, NumericRange, ProviderCapabilities,
};
use crate::classifier::{extract_error_message, ErrorContext};
use crate::errors::ProviderError;
use crate::models::*;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Fields the OpenAI request schema defines; `extra` never overrides them
pub(crate) const STANDARD_CHAT_FIELDS: &[&str] = &[
    "model",
    "messages",
    "max_tokens",
    "max_completion_tokens",
    "temperature",
    "top_p",
    "top_k",
    "n",
    "stream",
    "stop",
    "frequency_penalty",
    "presence_penalty",
    "logit_bias",
    "seed",
    "user",
    "response_format",
    "tools",
    "tool_choice",
    "parallel_tool_calls",
    "stream_options",
];

const STANDARD_IMAGE_FIELDS: &[&str] = &[
    "model",
    "prompt",
    "n",
    "size",
    "response_format",
    "quality",
    "style",
    "user",
    "image",
    "mask",
];

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Keep only `extra` entries that don't collide with a standard field
pub fn passthrough_extras(
    extra: &HashMap<String, Value>,
    standard: &[&str],
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in extra {
        if standard.contains(&key.as_str()) {
            tracing::debug!(
                field = %key,
                "Ignoring extra field that collides with a standard field"
            );
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    out
}

// ==================== Chat Request ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiImageUrl {
    pub url: String,
    pub detail: &'static str,
}

/// Translate message content; pure-text part lists collapse to a string
pub fn map_content(content: &MessageContent) -> OpenAiContent {
    match content {
        MessageContent::Text(text) => OpenAiContent::Text(text.clone()),
        MessageContent::Parts(_) if !content.has_images() => OpenAiContent::Text(content.text()),
        MessageContent::Parts(parts) => OpenAiContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => OpenAiContentPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { image_url } => OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: image_url.url.clone(),
                            detail: image_url.detail.unwrap_or(ImageDetail::Auto).as_str(),
                        },
                    },
                })
                .collect(),
        ),
    }
}

pub fn map_message(message: &ChatMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: message.role.as_str(),
        content: message.content.as_ref().map(map_content),
        name: message.name.clone(),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls: message.tool_calls.clone(),
    }
}

/// Check a sampling value against the provider's range
///
/// `Ok(None)` means the provider doesn't take the parameter and it is dropped.
pub fn gate_range(
    name: &str,
    value: Option<f32>,
    range: Option<NumericRange>,
    provider: &str,
) -> Result<Option<f32>, ProviderError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(range) = range else {
        tracing::debug!(provider, parameter = name, "Dropping unsupported parameter");
        return Ok(None);
    };
    if !range.contains(f64::from(value)) {
        return Err(ProviderError::validation(format!(
            "{name} must be between {} and {} for provider '{provider}', got {value}",
            range.min, range.max
        )));
    }
    Ok(Some(value))
}

/// Validate `stop` and `max_tokens` against provider limits
pub fn gate_limits(
    params: &ChatCompletionParams,
    chat: &ChatParameterSupport,
    provider: &str,
) -> Result<(Option<Vec<String>>, Option<i64>), ProviderError> {
    let stop = match &params.stop {
        Some(stop) if !stop.is_empty() && chat.max_stop_sequences == 0 => {
            tracing::debug!(provider, parameter = "stop", "Dropping unsupported parameter");
            None
        }
        Some(stop) if stop.len() > chat.max_stop_sequences => {
            return Err(ProviderError::validation(format!(
                "provider '{provider}' accepts at most {} stop sequences, got {}",
                chat.max_stop_sequences,
                stop.len()
            )));
        }
        Some(stop) if !stop.is_empty() => Some(stop.clone()),
        _ => None,
    };

    let max_tokens = params.effective_max_tokens();
    if let (Some(requested), Some(ceiling)) = (max_tokens, chat.max_tokens_ceiling) {
        if requested > ceiling {
            return Err(ProviderError::validation(format!(
                "max_tokens {requested} exceeds the limit of {ceiling} for provider '{provider}'"
            )));
        }
    }

    Ok((stop, max_tokens))
}

/// Build the upstream chat request
///
/// The provider model id goes on the wire; the alias never leaves the gateway.
pub fn build_chat_request(
    params: &ChatCompletionParams,
    provider_model: &str,
    caps: &ProviderCapabilities,
    stream: bool,
) -> Result<OpenAiChatRequest, ProviderError> {
    let chat = &caps.chat;
    let provider = caps.id;

    let temperature = gate_range("temperature", params.temperature, chat.temperature, provider)?;
    let top_p = gate_range("top_p", params.top_p, chat.top_p, provider)?;
    let frequency_penalty = gate_range(
        "frequency_penalty",
        params.frequency_penalty,
        chat.frequency_penalty,
        provider,
    )?;
    let presence_penalty = gate_range(
        "presence_penalty",
        params.presence_penalty,
        chat.presence_penalty,
        provider,
    )?;
    let top_k = gate_range(
        "top_k",
        params.top_k.map(|k| k as f32),
        chat.top_k,
        provider,
    )?
    .and(params.top_k);
    let (stop, max_tokens) = gate_limits(params, chat, provider)?;

    let (max_tokens, max_completion_tokens) = match chat.max_tokens_field {
        MaxTokensField::MaxTokens => (max_tokens, None),
        MaxTokensField::MaxCompletionTokens => (None, max_tokens),
    };

    let stream_options = (stream && chat.stream_usage).then_some(StreamOptions {
        include_usage: Some(true),
    });

    Ok(OpenAiChatRequest {
        model: provider_model.to_string(),
        messages: params.messages.iter().map(map_message).collect(),
        max_tokens,
        max_completion_tokens,
        temperature,
        top_p,
        top_k,
        n: params.n.filter(|_| chat.n),
        stream: stream.then_some(true),
        stop,
        frequency_penalty,
        presence_penalty,
        logit_bias: params.logit_bias.clone().filter(|_| chat.logit_bias),
        seed: params.seed.filter(|_| chat.seed),
        user: params.user.clone(),
        response_format: params.response_format.clone().filter(|_| chat.response_format),
        tools: params.tools.clone().filter(|tools| !tools.is_empty()),
        tool_choice: params.tool_choice.clone().filter(|_| params.has_tools()),
        parallel_tool_calls: params
            .parallel_tool_calls
            .filter(|_| chat.parallel_tool_calls && params.has_tools()),
        stream_options,
        extra: passthrough_extras(&params.extra, STANDARD_CHAT_FIELDS),
    })
}

// ==================== Lenient Deserialization ====================

/// Deserialize a value, treating a wrong type as absent
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Deserialize a list, dropping entries that don't fit
pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

// ==================== Chat Response ====================

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    created: Option<i64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    choices: Vec<OpenAiChoice>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<TokenUsage>,
    #[serde(default, deserialize_with = "lenient")]
    system_fingerprint: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default, deserialize_with = "lenient")]
    index: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<OpenAiResponseMessage>,
    #[serde(default, deserialize_with = "lenient")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default, deserialize_with = "lenient")]
    role: Option<MessageRole>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, deserialize_with = "lenient")]
    refusal: Option<String>,
    #[serde(default, deserialize_with = "lenient", alias = "reasoning")]
    reasoning_content: Option<String>,
}

/// A response carrying only identity fields
pub fn minimal_response(
    id: Option<String>,
    alias: &str,
    provider_model: &str,
) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_string(),
        created: now_timestamp(),
        model: alias.to_string(),
        provider_model: Some(provider_model.to_string()),
        choices: Vec::new(),
        usage: None,
        system_fingerprint: None,
        seed: None,
    }
}

/// Map an upstream chat body; never fails
pub fn map_chat_response(body: &[u8], alias: &str, provider_model: &str) -> ChatCompletionResponse {
    let wire = match serde_json::from_slice::<OpenAiChatResponse>(body) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(
                model = %provider_model,
                error = %e,
                "Could not map chat response, returning minimal response"
            );
            let id = serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|v| v.get("id")?.as_str().map(str::to_string));
            return minimal_response(id, alias, provider_model);
        }
    };

    let choices = wire
        .choices
        .into_iter()
        .enumerate()
        .map(|(position, choice)| {
            let message = choice.message;
            ChatCompletionResponseChoice {
                index: choice.index.unwrap_or(position as i64),
                finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
                message: match message {
                    Some(m) => ChatResponseMessage {
                        role: m.role.unwrap_or(MessageRole::Assistant),
                        content: m.content,
                        tool_calls: m.tool_calls.filter(|calls| !calls.is_empty()),
                        refusal: m.refusal,
                        reasoning_content: m.reasoning_content,
                    },
                    None => ChatResponseMessage {
                        role: MessageRole::Assistant,
                        content: None,
                        tool_calls: None,
                        refusal: None,
                        reasoning_content: None,
                    },
                },
            }
        })
        .collect();

    ChatCompletionResponse {
        id: wire.id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_string(),
        created: wire.created.unwrap_or_else(now_timestamp),
        model: alias.to_string(),
        provider_model: Some(provider_model.to_string()),
        choices,
        usage: wire.usage.map(normalize_usage),
        system_fingerprint: wire.system_fingerprint,
        seed: wire.seed,
    }
}

fn normalize_usage(mut usage: TokenUsage) -> TokenUsage {
    if usage.total_tokens == 0 {
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    }
    usage
}

// ==================== Stream Chunks ====================

/// One decoded SSE payload from an OpenAI-compatible stream
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OpenAiStreamPayload {
    Error {
        #[serde(deserialize_with = "present_error")]
        error: Value,
    },
    Chunk(OpenAiChunk),
}

/// Accept only an error object or message; `"error": null` rides on normal chunks
fn present_error<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        value @ (Value::Object(_) | Value::String(_)) => Ok(value),
        _ => Err(serde::de::Error::custom("no error present")),
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChunk {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    created: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    system_fingerprint: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    choices: Vec<OpenAiChunkChoice>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkChoice {
    #[serde(default, deserialize_with = "lenient")]
    index: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<OpenAiDelta>,
    #[serde(default, deserialize_with = "lenient")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default, deserialize_with = "lenient")]
    role: Option<MessageRole>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default, deserialize_with = "lenient", alias = "reasoning")]
    reasoning_content: Option<String>,
}

/// Translate one stream payload, surfacing in-band error events
pub fn map_stream_payload(
    payload: OpenAiStreamPayload,
    alias: &str,
    provider_model: &str,
    ctx: &ErrorContext,
) -> Result<ChatCompletionChunk, ProviderError> {
    match payload {
        OpenAiStreamPayload::Error { error } => {
            let body = serde_json::json!({ "error": error }).to_string();
            Err(ProviderError::communication(format!(
                "provider '{}' reported an error mid-stream: {}",
                ctx.provider,
                extract_error_message(&body)
            ))
            .with_context(&ctx.provider, &ctx.model))
        }
        OpenAiStreamPayload::Chunk(chunk) => Ok(map_chunk(chunk, alias, provider_model)),
    }
}

pub fn map_chunk(chunk: OpenAiChunk, alias: &str, provider_model: &str) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: chunk.id.unwrap_or_else(new_completion_id),
        object: "chat.completion.chunk".to_string(),
        created: chunk.created.unwrap_or_else(now_timestamp),
        model: alias.to_string(),
        provider_model: Some(provider_model.to_string()),
        system_fingerprint: chunk.system_fingerprint,
        choices: chunk
            .choices
            .into_iter()
            .enumerate()
            .map(|(position, choice)| ChatChoice {
                index: choice.index.unwrap_or(position as i64),
                delta: choice.delta.map(|d| ChatDelta {
                    role: d.role,
                    content: d.content,
                    tool_calls: d.tool_calls,
                    reasoning_content: d.reasoning_content,
                }),
                finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
            })
            .collect(),
        usage: chunk.usage.map(normalize_usage),
    }
}

// ==================== Embeddings ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiEmbeddingRequest {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<EncodingFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

pub fn build_embedding_request(
    params: &EmbeddingParams,
    provider_model: &str,
) -> OpenAiEmbeddingRequest {
    OpenAiEmbeddingRequest {
        model: provider_model.to_string(),
        input: params.input.clone(),
        dimensions: params.dimensions,
        encoding_format: params.encoding_format,
        user: params.user.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    data: Vec<OpenAiEmbedding>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<OpenAiEmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: Option<i64>,
    embedding: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingUsage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    total_tokens: i32,
}

/// Decode a base64 vector of little-endian f32 values
pub fn decode_base64_embedding(encoded: &str) -> Result<Vec<f32>, ProviderError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::communication(format!("invalid base64 embedding: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(ProviderError::communication(format!(
            "base64 embedding has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn decode_embedding(value: Value) -> Result<Vec<f32>, ProviderError> {
    match value {
        Value::String(encoded) => decode_base64_embedding(&encoded),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ProviderError::communication("embedding contains a non-number"))
            })
            .collect(),
        _ => Err(ProviderError::communication("embedding is neither a list nor base64")),
    }
}

pub fn map_embedding_response(
    body: &[u8],
    alias: &str,
    provider_model: &str,
    expected: usize,
) -> Result<EmbeddingResponse, ProviderError> {
    let wire: OpenAiEmbeddingResponse = serde_json::from_slice(body).map_err(|e| {
        ProviderError::communication(format!("malformed embedding response: {e}")).with_source(e)
    })?;
    if wire.data.is_empty() && expected > 0 {
        return Err(ProviderError::communication("embedding response contained no vectors"));
    }
    if wire.data.len() < expected {
        return Err(ProviderError::communication(format!(
            "embedding response contained {} vectors for {expected} inputs",
            wire.data.len()
        )));
    }
    if wire.data.len() > expected {
        tracing::warn!(
            model = provider_model,
            expected,
            received = wire.data.len(),
            "Embedding response has more vectors than inputs"
        );
    }

    let mut data = wire
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            Ok(Embedding {
                object: "embedding".to_string(),
                index: item.index.unwrap_or(position as i64),
                embedding: decode_embedding(item.embedding)?,
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;
    data.sort_by_key(|e| e.index);

    let prompt_tokens = wire
        .usage
        .map(|u| if u.prompt_tokens > 0 { u.prompt_tokens } else { u.total_tokens })
        .unwrap_or(0);

    Ok(EmbeddingResponse {
        object: "list".to_string(),
        model: alias.to_string(),
        provider_model: Some(provider_model.to_string()),
        data,
        usage: TokenUsage::new(prompt_tokens, 0),
    })
}

// ==================== Images ====================

/// JSON body for `/images/generations`
pub fn build_image_request(
    params: &ImageGenerationParams,
    provider_model: &str,
    caps: &ProviderCapabilities,
) -> Value {
    let mut body = passthrough_extras(&params.extra, STANDARD_IMAGE_FIELDS);
    for (key, value) in image_fields(params, provider_model, caps) {
        body.insert(key.to_string(), value);
    }
    Value::Object(body)
}

fn image_fields(
    params: &ImageGenerationParams,
    provider_model: &str,
    caps: &ProviderCapabilities,
) -> Vec<(&'static str, Value)> {
    let mut fields = vec![("model", Value::from(provider_model))];
    if !params.prompt.is_empty() {
        fields.push(("prompt", Value::from(params.prompt.as_str())));
    }
    if let Some(n) = params.n {
        fields.push(("n", Value::from(n)));
    }
    if let Some(size) = &params.size {
        fields.push(("size", Value::from(size.as_str())));
    }
    if let Some(format) = &params.response_format {
        fields.push(("response_format", Value::from(format.as_str())));
    }
    if let Some(user) = &params.user {
        fields.push(("user", Value::from(user.as_str())));
    }
    if caps.features.image_quality_style {
        if let Some(quality) = &params.quality {
            fields.push(("quality", Value::from(quality.as_str())));
        }
        if let Some(style) = &params.style {
            fields.push(("style", Value::from(style.as_str())));
        }
    }
    fields
}

fn file_part(file: &ImageFile) -> Result<reqwest::multipart::Part, ProviderError> {
    reqwest::multipart::Part::bytes(file.bytes.clone())
        .file_name(file.filename.clone())
        .mime_str(file.mime_type())
        .map_err(|e| {
            ProviderError::validation(format!("invalid image file '{}': {e}", file.filename))
        })
}

fn form_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Multipart body for `/images/edits` and `/images/variations`
pub fn build_image_form(
    params: &ImageGenerationParams,
    source: &ImageSource,
    provider_model: &str,
    caps: &ProviderCapabilities,
) -> Result<reqwest::multipart::Form, ProviderError> {
    let mut form = reqwest::multipart::Form::new();
    for (key, value) in passthrough_extras(&params.extra, STANDARD_IMAGE_FIELDS) {
        form = form.text(key, form_text(&value));
    }
    for (key, value) in image_fields(params, provider_model, caps) {
        if key == "prompt" && matches!(source, ImageSource::Variation { .. }) {
            continue;
        }
        form = form.text(key, form_text(&value));
    }

    match source {
        ImageSource::Edit { image, mask } => {
            form = form.part("image", file_part(image)?);
            if let Some(mask) = mask {
                form = form.part("mask", file_part(mask)?);
            }
        }
        ImageSource::Variation { image } => {
            form = form.part("image", file_part(image)?);
        }
    }
    Ok(form)
}

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    #[serde(default, deserialize_with = "lenient")]
    created: Option<i64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    data: Vec<ImageData>,
}

pub fn map_image_response(
    body: &[u8],
    alias: &str,
) -> Result<ImageGenerationResponse, ProviderError> {
    let wire: OpenAiImageResponse = serde_json::from_slice(body).map_err(|e| {
        ProviderError::communication(format!("malformed image response: {e}")).with_source(e)
    })?;
    if wire.data.is_empty() {
        return Err(ProviderError::communication("image response contained no images"));
    }
    Ok(ImageGenerationResponse {
        created: wire.created.unwrap_or_else(now_timestamp),
        model: alias.to_string(),
        data: wire.data,
    })
}

// ==================== Models ====================

#[derive(Debug, Deserialize)]
struct OpenAiModelsResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    data: Vec<ModelInfo>,
}

pub fn map_models_response(body: &[u8]) -> Result<ModelsResponse, ProviderError> {
    let wire: OpenAiModelsResponse = serde_json::from_slice(body).map_err(|e| {
        ProviderError::communication(format!("malformed model list: {e}")).with_source(e)
    })?;
    Ok(ModelsResponse {
        object: "list".to_string(),
        data: wire.data,
    })
}
