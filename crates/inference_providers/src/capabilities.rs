//! Provider capability registry
//!
//! A static, data-driven table describing what each supported provider
//! accepts: wire protocol, authentication shape, parameter ranges and feature
//! flags. Everything here is immutable and free of I/O.

use crate::errors::ProviderError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive numeric bounds for a sampling parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Which request/response translation a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireBackend {
    OpenAiCompatible,
    AzureOpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `<header>: Bearer <key>`
    Bearer,
    /// `<header>: <key>`
    Header,
    /// Key-less (local runtimes)
    None,
}

/// Where a configuration field ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPlacement {
    /// The credential itself, sent via the auth header
    Credential,
    /// Substituted into `{name}` in the base URL
    BaseUrlTemplate,
    /// Sent as an extra request header
    Header(&'static str),
    /// Consumed by the adapter (e.g. an API version query parameter)
    Setting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub label: &'static str,
    pub required: bool,
    pub secret: bool,
    /// Regex the value must match, if any
    pub pattern: Option<&'static str>,
    pub placement: FieldPlacement,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthShape {
    pub header_name: Option<&'static str>,
    pub scheme: AuthScheme,
    pub fields: &'static [ConfigField],
}

/// Name of the output-length field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxTokensField {
    MaxTokens,
    MaxCompletionTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChatParameterSupport {
    pub temperature: Option<NumericRange>,
    pub top_p: Option<NumericRange>,
    pub top_k: Option<NumericRange>,
    pub frequency_penalty: Option<NumericRange>,
    pub presence_penalty: Option<NumericRange>,
    /// Hard upper bound on requested output tokens
    pub max_tokens_ceiling: Option<i64>,
    pub max_tokens_field: MaxTokensField,
    /// 0 when stop sequences are not accepted
    pub max_stop_sequences: usize,
    pub seed: bool,
    pub logit_bias: bool,
    pub response_format: bool,
    pub parallel_tool_calls: bool,
    pub n: bool,
    /// Supports `stream_options.include_usage`
    pub stream_usage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub streaming: bool,
    pub embeddings: bool,
    pub image_generation: bool,
    /// Multipart `/images/edits` and `/images/variations`
    pub image_edits: bool,
    /// Accepts `quality` and `style` on image requests
    pub image_quality_style: bool,
    pub vision: bool,
    pub function_calling: bool,
    pub audio_transcription: bool,
    pub text_to_speech: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCapabilities {
    pub id: &'static str,
    pub display_name: &'static str,
    pub backend: WireBackend,
    pub default_base_url: &'static str,
    pub auth: AuthShape,
    pub chat: ChatParameterSupport,
    pub features: FeatureFlags,
}

impl ProviderCapabilities {
    pub fn requires_api_key(&self) -> bool {
        self.auth.scheme != AuthScheme::None
    }

    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.auth.fields.iter().find(|f| f.name == name)
    }
}

// ==================== Baselines ====================

const API_KEY: ConfigField = ConfigField {
    name: "api_key",
    label: "API Key",
    required: true,
    secret: true,
    pattern: None,
    placement: FieldPlacement::Credential,
    description: "Secret key issued by the provider",
};

const BEARER_AUTH: AuthShape = AuthShape {
    header_name: Some("Authorization"),
    scheme: AuthScheme::Bearer,
    fields: &[API_KEY],
};

const SAMPLING_0_2: NumericRange = NumericRange::new(0.0, 2.0);
const UNIT: NumericRange = NumericRange::new(0.0, 1.0);
const PENALTY: NumericRange = NumericRange::new(-2.0, 2.0);
const TOP_K: NumericRange = NumericRange::new(0.0, f64::MAX);

const OPENAI_CHAT: ChatParameterSupport = ChatParameterSupport {
    temperature: Some(SAMPLING_0_2),
    top_p: Some(UNIT),
    top_k: None,
    frequency_penalty: Some(PENALTY),
    presence_penalty: Some(PENALTY),
    max_tokens_ceiling: None,
    max_tokens_field: MaxTokensField::MaxCompletionTokens,
    max_stop_sequences: 4,
    seed: true,
    logit_bias: true,
    response_format: true,
    parallel_tool_calls: true,
    n: true,
    stream_usage: true,
};

/// What a typical OpenAI-compatible host accepts
const COMPAT_CHAT: ChatParameterSupport = ChatParameterSupport {
    max_tokens_field: MaxTokensField::MaxTokens,
    logit_bias: false,
    parallel_tool_calls: false,
    stream_usage: false,
    ..OPENAI_CHAT
};

const CHAT_ONLY: FeatureFlags = FeatureFlags {
    streaming: true,
    embeddings: false,
    image_generation: false,
    image_edits: false,
    image_quality_style: false,
    vision: false,
    function_calling: true,
    audio_transcription: false,
    text_to_speech: false,
};

const ALL_FEATURES: FeatureFlags = FeatureFlags {
    streaming: true,
    embeddings: true,
    image_generation: true,
    image_edits: true,
    image_quality_style: true,
    vision: true,
    function_calling: true,
    audio_transcription: true,
    text_to_speech: true,
};

// ==================== Registry ====================

static PROVIDERS: &[ProviderCapabilities] = &[
    ProviderCapabilities {
        id: "openai",
        display_name: "OpenAI",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.openai.com/v1",
        auth: AuthShape {
            header_name: Some("Authorization"),
            scheme: AuthScheme::Bearer,
            fields: &[
                ConfigField {
                    pattern: Some(r"^sk-"),
                    ..API_KEY
                },
                ConfigField {
                    name: "organization_id",
                    label: "Organization ID",
                    required: false,
                    secret: false,
                    pattern: Some(r"^org-"),
                    placement: FieldPlacement::Header("OpenAI-Organization"),
                    description: "Bill requests to a specific organization",
                },
            ],
        },
        chat: OPENAI_CHAT,
        features: ALL_FEATURES,
    },
    ProviderCapabilities {
        id: "azure",
        display_name: "Azure OpenAI",
        backend: WireBackend::AzureOpenAi,
        default_base_url: "https://{resource}.openai.azure.com",
        auth: AuthShape {
            header_name: Some("api-key"),
            scheme: AuthScheme::Header,
            fields: &[
                API_KEY,
                ConfigField {
                    name: "resource",
                    label: "Resource Name",
                    required: true,
                    secret: false,
                    pattern: Some(r"^[a-zA-Z0-9][a-zA-Z0-9-]{1,62}$"),
                    placement: FieldPlacement::BaseUrlTemplate,
                    description: "Azure OpenAI resource name (the subdomain of openai.azure.com)",
                },
                ConfigField {
                    name: "api_version",
                    label: "API Version",
                    required: false,
                    secret: false,
                    pattern: Some(r"^\d{4}-\d{2}-\d{2}(-preview)?$"),
                    placement: FieldPlacement::Setting,
                    description: "Data-plane API version, e.g. 2024-06-01",
                },
            ],
        },
        chat: ChatParameterSupport {
            max_tokens_field: MaxTokensField::MaxTokens,
            ..OPENAI_CHAT
        },
        features: ALL_FEATURES,
    },
    ProviderCapabilities {
        id: "anthropic",
        display_name: "Anthropic",
        backend: WireBackend::Anthropic,
        default_base_url: "https://api.anthropic.com/v1",
        auth: AuthShape {
            header_name: Some("x-api-key"),
            scheme: AuthScheme::Header,
            fields: &[
                ConfigField {
                    pattern: Some(r"^sk-ant-"),
                    ..API_KEY
                },
                ConfigField {
                    name: "anthropic_version",
                    label: "API Version",
                    required: false,
                    secret: false,
                    pattern: Some(r"^\d{4}-\d{2}-\d{2}$"),
                    placement: FieldPlacement::Header("anthropic-version"),
                    description: "Value of the anthropic-version header",
                },
            ],
        },
        chat: ChatParameterSupport {
            temperature: Some(UNIT),
            top_p: Some(UNIT),
            top_k: Some(TOP_K),
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens_ceiling: None,
            max_tokens_field: MaxTokensField::MaxTokens,
            max_stop_sequences: 1024,
            seed: false,
            logit_bias: false,
            response_format: false,
            parallel_tool_calls: false,
            n: false,
            stream_usage: false,
        },
        features: FeatureFlags {
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "gemini",
        display_name: "Google Gemini",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            frequency_penalty: None,
            presence_penalty: None,
            seed: false,
            stream_usage: true,
            max_stop_sequences: 5,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            image_generation: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "bedrock",
        display_name: "Amazon Bedrock",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://bedrock-runtime.{region}.amazonaws.com/openai/v1",
        auth: AuthShape {
            header_name: Some("Authorization"),
            scheme: AuthScheme::Bearer,
            fields: &[
                API_KEY,
                ConfigField {
                    name: "region",
                    label: "AWS Region",
                    required: true,
                    secret: false,
                    pattern: Some(r"^[a-z]{2}(-gov)?-[a-z]+-\d$"),
                    placement: FieldPlacement::BaseUrlTemplate,
                    description: "AWS region hosting the model, e.g. us-west-2",
                },
            ],
        },
        chat: ChatParameterSupport {
            frequency_penalty: None,
            presence_penalty: None,
            seed: false,
            n: false,
            ..COMPAT_CHAT
        },
        features: CHAT_ONLY,
    },
    ProviderCapabilities {
        id: "groq",
        display_name: "Groq",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.groq.com/openai/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            n: false,
            parallel_tool_calls: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            vision: true,
            audio_transcription: true,
            text_to_speech: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "cohere",
        display_name: "Cohere",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.cohere.ai/compatibility/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            temperature: Some(UNIT),
            frequency_penalty: Some(UNIT),
            presence_penalty: Some(UNIT),
            n: false,
            max_stop_sequences: 5,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "mistral",
        display_name: "Mistral AI",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.mistral.ai/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            temperature: Some(NumericRange::new(0.0, 1.5)),
            seed: false,
            parallel_tool_calls: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "together",
        display_name: "Together AI",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.together.xyz/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            top_k: Some(TOP_K),
            logit_bias: true,
            stream_usage: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            image_generation: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "fireworks",
        display_name: "Fireworks AI",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.fireworks.ai/inference/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            top_k: Some(TOP_K),
            logit_bias: true,
            stream_usage: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "deepseek",
        display_name: "DeepSeek",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.deepseek.com/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            max_tokens_ceiling: Some(8192),
            seed: false,
            n: false,
            max_stop_sequences: 16,
            stream_usage: true,
            ..COMPAT_CHAT
        },
        features: CHAT_ONLY,
    },
    ProviderCapabilities {
        id: "openrouter",
        display_name: "OpenRouter",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://openrouter.ai/api/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            top_k: Some(TOP_K),
            logit_bias: true,
            parallel_tool_calls: true,
            stream_usage: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "xai",
        display_name: "xAI",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.x.ai/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            stream_usage: true,
            parallel_tool_calls: true,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            image_generation: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "perplexity",
        display_name: "Perplexity",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.perplexity.ai",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            top_k: Some(NumericRange::new(0.0, 2048.0)),
            frequency_penalty: Some(NumericRange::new(0.0, 2.0)),
            seed: false,
            n: false,
            max_stop_sequences: 0,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            function_calling: false,
            ..CHAT_ONLY
        },
    },
    ProviderCapabilities {
        id: "cerebras",
        display_name: "Cerebras",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "https://api.cerebras.ai/v1",
        auth: BEARER_AUTH,
        chat: ChatParameterSupport {
            temperature: Some(NumericRange::new(0.0, 1.5)),
            frequency_penalty: None,
            presence_penalty: None,
            n: false,
            ..COMPAT_CHAT
        },
        features: CHAT_ONLY,
    },
    ProviderCapabilities {
        id: "ollama",
        display_name: "Ollama",
        backend: WireBackend::OpenAiCompatible,
        default_base_url: "http://localhost:11434/v1",
        auth: AuthShape {
            header_name: None,
            scheme: AuthScheme::None,
            fields: &[],
        },
        chat: ChatParameterSupport {
            top_k: Some(TOP_K),
            n: false,
            ..COMPAT_CHAT
        },
        features: FeatureFlags {
            embeddings: true,
            vision: true,
            ..CHAT_ONLY
        },
    },
];

/// Look up a provider by id (case-insensitive)
pub fn find(provider_id: &str) -> Option<&'static ProviderCapabilities> {
    PROVIDERS
        .iter()
        .find(|caps| caps.id.eq_ignore_ascii_case(provider_id))
}

pub fn all() -> &'static [ProviderCapabilities] {
    PROVIDERS
}

// ==================== Validation ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a single configuration error naming every bad field
    pub fn into_result(self, provider: &str) -> Result<(), ProviderError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let details = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ProviderError::configuration(format!(
            "invalid settings for provider '{provider}': {details}"
        )))
    }
}

/// Check configured values against the provider's field descriptors
///
/// Messages never echo secret values.
pub fn validate(caps: &ProviderCapabilities, values: &HashMap<String, String>) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in caps.auth.fields {
        let value = values
            .get(field.name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        let Some(value) = value else {
            if field.required {
                result.errors.push(FieldError {
                    field: field.name.to_string(),
                    message: format!("{} is required", field.label),
                });
            }
            continue;
        };

        let Some(pattern) = field.pattern else {
            continue;
        };
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(value) => {
                let message = if field.secret {
                    format!("{} has an unexpected format", field.label)
                } else {
                    format!("{} '{value}' does not match {pattern}", field.label)
                };
                result.errors.push(FieldError {
                    field: field.name.to_string(),
                    message,
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    provider = caps.id,
                    field = field.name,
                    error = %e,
                    "Invalid field pattern"
                );
            }
        }
    }

    result
}

/// Substitute `{field}` placeholders in a base URL template
pub fn expand_base_url(
    template: &str,
    values: &HashMap<String, String>,
) -> Result<String, ProviderError> {
    let mut url = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        let value = values
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ProviderError::configuration(format!(
                    "base URL '{template}' needs a value for '{name}'"
                ))
            })?;
        url.push_str(&rest[..open]);
        url.push_str(value);
        rest = &rest[open + close + 1..];
    }
    url.push_str(rest);

    Ok(url.trim_end_matches('/').to_string())
}

// ==================== Per-model Narrowing ====================

/// Per-mapping feature switches applied after model heuristics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOverrides {
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub vision: Option<bool>,
    #[serde(default)]
    pub function_calling: Option<bool>,
    #[serde(default)]
    pub embeddings: Option<bool>,
    #[serde(default)]
    pub image_generation: Option<bool>,
}

/// OpenAI o-series reasoning models (`o1`, `o3-mini`, `o4-mini`, ...)
fn is_reasoning_model(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn is_embedding_model(model: &str) -> bool {
    model.contains("embed")
}

fn is_image_model(model: &str) -> bool {
    model.starts_with("dall-e")
        || model.contains("image")
        || model.contains("imagen")
        || model.contains("flux")
        || model.contains("stable-diffusion")
}

/// The provider's capabilities as they apply to one model
pub fn narrow_for_model(
    caps: &ProviderCapabilities,
    model_id: &str,
    overrides: &FeatureOverrides,
) -> ProviderCapabilities {
    let mut narrowed = caps.clone();
    let lowered = model_id.to_ascii_lowercase();
    // Aggregators prefix the vendor: "openai/o3-mini"
    let model = lowered.rsplit('/').next().unwrap_or(lowered.as_str());

    if is_reasoning_model(model) {
        let chat = &mut narrowed.chat;
        chat.temperature = None;
        chat.top_p = None;
        chat.frequency_penalty = None;
        chat.presence_penalty = None;
        chat.logit_bias = false;
        chat.n = false;
        chat.parallel_tool_calls = false;
        chat.max_tokens_field = MaxTokensField::MaxCompletionTokens;
        if model.starts_with("o1-mini") || model.starts_with("o1-preview") {
            narrowed.features.vision = false;
            narrowed.features.function_calling = false;
            narrowed.chat.response_format = false;
        }
    }

    if is_embedding_model(model) {
        narrowed.features = FeatureFlags {
            embeddings: true,
            ..no_features()
        };
    } else if is_image_model(model) {
        narrowed.features = FeatureFlags {
            image_generation: true,
            image_edits: caps.features.image_edits && model.starts_with("dall-e-2"),
            image_quality_style: caps.features.image_quality_style,
            ..no_features()
        };
    } else {
        // A chat model does not serve the other endpoints
        narrowed.features.embeddings = false;
        narrowed.features.image_generation = false;
        narrowed.features.image_edits = false;
    }

    if caps.backend == WireBackend::Anthropic
        && (model.starts_with("claude-2") || model.starts_with("claude-instant"))
    {
        narrowed.features.vision = false;
    }

    apply_overrides(&mut narrowed.features, overrides);
    narrowed
}

fn no_features() -> FeatureFlags {
    FeatureFlags {
        streaming: false,
        embeddings: false,
        image_generation: false,
        image_edits: false,
        image_quality_style: false,
        vision: false,
        function_calling: false,
        audio_transcription: false,
        text_to_speech: false,
    }
}

fn apply_overrides(features: &mut FeatureFlags, overrides: &FeatureOverrides) {
    if let Some(v) = overrides.streaming {
        features.streaming = v;
    }
    if let Some(v) = overrides.vision {
        features.vision = v;
    }
    if let Some(v) = overrides.function_calling {
        features.function_calling = v;
    }
    if let Some(v) = overrides.embeddings {
        features.embeddings = v;
    }
    if let Some(v) = overrides.image_generation {
        features.image_generation = v;
    }
}

// ==================== UI Hints ====================

/// Form field descriptor for management UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldHint {
    pub name: &'static str,
    pub label: &'static str,
    pub input_type: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    pub description: &'static str,
}

/// Describe the fields a form needs to configure this provider
pub fn ui_hints(caps: &ProviderCapabilities) -> Vec<FieldHint> {
    let mut hints: Vec<FieldHint> = caps
        .auth
        .fields
        .iter()
        .map(|field| FieldHint {
            name: field.name,
            label: field.label,
            input_type: if field.secret { "password" } else { "text" },
            required: field.required,
            pattern: field.pattern,
            placeholder: None,
            description: field.description,
        })
        .collect();

    hints.push(FieldHint {
        name: "base_url",
        label: "Base URL",
        input_type: "url",
        required: false,
        pattern: None,
        placeholder: Some(caps.default_base_url),
        description: "Override the provider endpoint",
    });
    hints
}
