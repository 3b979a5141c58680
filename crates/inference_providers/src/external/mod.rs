//! External provider module for third-party AI providers
//!
//! This module provides a unified `ExternalProvider` that puts every upstream
//! API (OpenAI, Azure, Anthropic, Gemini, Groq, ...) behind a single
//! implementation of the `InferenceProvider` trait.
//!
//! # Architecture
//!
//! ```text
//! AdapterFactory::create(ExternalProviderConfig)
//!     └── ExternalProvider (implements InferenceProvider)
//!         └── backends:
//!             ├── OpenAiCompatibleBackend (OpenAI, Azure, Groq, Together, Ollama, ...)
//!             └── AnthropicBackend
//! ```
//!
//! # Adding New Providers
//!
//! 1. **If OpenAI-compatible**: add a row to the capability table in
//!    [`crate::capabilities`] with `WireBackend::OpenAiCompatible`.
//!
//! 2. **If different API format**: add a new backend implementing
//!    [`ProviderBackend`] and a matching `WireBackend` variant.

pub mod anthropic;
pub mod backend;
pub mod openai_compatible;

use crate::capabilities::{
    self, expand_base_url, narrow_for_model, FeatureOverrides, ProviderCapabilities, WireBackend,
};
use crate::errors::ProviderError;
use crate::models::{
    ChatCompletionParams, ChatCompletionResponse, EmbeddingParams, EmbeddingResponse,
    ImageGenerationParams, ImageGenerationResponse, ModelsResponse,
};
use crate::{InferenceProvider, StreamingResult};
use async_trait::async_trait;
use backend::{BackendConfig, BackendRequest, ProviderBackend};
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub use anthropic::AnthropicBackend;
pub use openai_compatible::OpenAiCompatibleBackend;

fn default_timeout_seconds() -> u64 {
    120
}

/// Configuration for one (provider, provider model) adapter
#[derive(Clone, serde::Deserialize)]
pub struct ExternalProviderConfig {
    /// Provider id from the capability registry (e.g. "openai", "anthropic")
    pub provider: String,
    /// Model id sent on the wire
    pub model_name: String,
    /// Empty for key-less providers
    #[serde(default)]
    pub api_key: String,
    /// Overrides the registry default; may contain `{field}` placeholders
    #[serde(default)]
    pub base_url: Option<String>,
    /// Provider-specific settings (organization_id, resource, region, ...)
    #[serde(default)]
    pub extra: HashMap<String, String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub feature_overrides: FeatureOverrides,
}

impl ExternalProviderConfig {
    pub fn new(
        provider: impl Into<String>,
        model_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            api_key: api_key.into(),
            base_url: None,
            extra: HashMap::new(),
            timeout_seconds: default_timeout_seconds(),
            feature_overrides: FeatureOverrides::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_feature_overrides(mut self, overrides: FeatureOverrides) -> Self {
        self.feature_overrides = overrides;
        self
    }
}

impl fmt::Debug for ExternalProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalProviderConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("extra", &self.extra)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("feature_overrides", &self.feature_overrides)
            .finish()
    }
}

/// Builds adapters from configuration
///
/// Holds the shared HTTP client; every adapter it creates reuses the pool.
#[derive(Clone)]
pub struct AdapterFactory {
    client: Client,
}

impl AdapterFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Resolve the capability record, base URL and backend for `config`
    pub fn create(
        &self,
        config: ExternalProviderConfig,
    ) -> Result<Arc<dyn InferenceProvider>, ProviderError> {
        Ok(Arc::new(self.create_provider(config)?))
    }

    pub fn create_provider(
        &self,
        config: ExternalProviderConfig,
    ) -> Result<ExternalProvider, ProviderError> {
        let caps = capabilities::find(&config.provider).ok_or_else(|| {
            ProviderError::configuration(format!("unknown provider '{}'", config.provider))
        })?;

        if config.model_name.trim().is_empty() {
            return Err(ProviderError::configuration(format!(
                "provider '{}' mapping has an empty model id",
                caps.id
            )));
        }

        let mut values = config.extra.clone();
        values.insert("api_key".to_string(), config.api_key.clone());
        capabilities::validate(caps, &values).into_result(caps.id)?;

        let template = config
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(caps.default_base_url);
        let base_url = expand_base_url(template, &values)?;

        let backend: Arc<dyn ProviderBackend> = match caps.backend {
            WireBackend::OpenAiCompatible | WireBackend::AzureOpenAi => {
                Arc::new(OpenAiCompatibleBackend::new(self.client.clone()))
            }
            WireBackend::Anthropic => Arc::new(AnthropicBackend::new(self.client.clone())),
        };

        tracing::debug!(
            provider = caps.id,
            model = %config.model_name,
            backend = backend.backend_type(),
            %base_url,
            "Created provider adapter"
        );

        let narrowed = narrow_for_model(caps, &config.model_name, &config.feature_overrides);
        Ok(ExternalProvider {
            backend,
            config: BackendConfig {
                provider: caps.id.to_string(),
                base_url,
                api_key: config.api_key,
                timeout_seconds: config.timeout_seconds,
                extra: config.extra,
            },
            registry: caps,
            capabilities: narrowed,
            model_name: config.model_name,
            overrides: config.feature_overrides,
        })
    }
}

/// External provider facade
///
/// Implements `InferenceProvider` by validating, gating on capabilities and
/// delegating to the backend for the provider's wire format.
pub struct ExternalProvider {
    backend: Arc<dyn ProviderBackend>,
    config: BackendConfig,
    registry: &'static ProviderCapabilities,
    /// Registry entry narrowed to `model_name`
    capabilities: ProviderCapabilities,
    model_name: String,
    overrides: FeatureOverrides,
}

impl ExternalProvider {
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request<'a>(&'a self, alias: &'a str, cancel: &'a CancellationToken) -> BackendRequest<'a> {
        BackendRequest {
            config: &self.config,
            capabilities: &self.capabilities,
            model: &self.model_name,
            alias,
            cancel,
        }
    }

    fn unsupported(&self, what: &str) -> ProviderError {
        ProviderError::model_unavailable(
            &self.model_name,
            &self.config.provider,
            format!("{what} is not supported"),
        )
    }

    fn check_chat(&self, params: &ChatCompletionParams) -> Result<(), ProviderError> {
        params.validate()?;
        let features = &self.capabilities.features;
        if params.has_images() && !features.vision {
            return Err(self.unsupported("image input"));
        }
        if params.has_tools() && !features.function_calling {
            return Err(self.unsupported("function calling"));
        }
        Ok(())
    }

    /// Log the outcome once and attach provider/model to errors
    fn finish<T>(
        &self,
        operation: &'static str,
        started: Instant,
        result: Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                tracing::debug!(
                    provider = %self.config.provider,
                    model = %self.model_name,
                    operation,
                    latency_ms,
                    "Provider call succeeded"
                );
                Ok(value)
            }
            Err(err) => {
                let err = err.with_context(&self.config.provider, &self.model_name);
                if err.is_cancelled() {
                    tracing::debug!(
                        provider = %self.config.provider,
                        model = %self.model_name,
                        operation,
                        "Provider call cancelled"
                    );
                } else {
                    tracing::warn!(
                        provider = %self.config.provider,
                        model = %self.model_name,
                        operation,
                        kind = %err.kind(),
                        status = ?err.status_code(),
                        latency_ms,
                        error = %err,
                        "Provider call failed"
                    );
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl InferenceProvider for ExternalProvider {
    fn provider_name(&self) -> &str {
        &self.config.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn capabilities(&self, model_id: &str) -> ProviderCapabilities {
        narrow_for_model(self.registry, model_id, &self.overrides)
    }

    async fn list_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ModelsResponse, ProviderError> {
        let started = Instant::now();
        let result = self.backend.list_models(self.request(&self.model_name, cancel)).await;
        self.finish("list_models", started, result)
    }

    async fn chat_completion(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let started = Instant::now();
        let result = match self.check_chat(params) {
            Ok(()) => {
                self.backend
                    .chat_completion(self.request(&params.model, cancel), params)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish("chat_completion", started, result)
    }

    async fn chat_completion_stream(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<StreamingResult, ProviderError> {
        let started = Instant::now();
        let result = if !self.capabilities.features.streaming {
            Err(self.unsupported("streaming"))
        } else {
            match self.check_chat(params) {
                Ok(()) => {
                    self.backend
                        .chat_completion_stream(self.request(&params.model, cancel), params)
                        .await
                }
                Err(e) => Err(e),
            }
        };
        self.finish("chat_completion_stream", started, result)
    }

    async fn create_embedding(
        &self,
        params: &EmbeddingParams,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let started = Instant::now();
        let result = match params.validate() {
            Err(e) => Err(e),
            Ok(()) if !self.capabilities.features.embeddings => Err(self.unsupported("embeddings")),
            Ok(()) => {
                self.backend
                    .create_embedding(self.request(&params.model, cancel), params)
                    .await
            }
        };
        self.finish("create_embedding", started, result)
    }

    async fn create_image(
        &self,
        params: &ImageGenerationParams,
        cancel: &CancellationToken,
    ) -> Result<ImageGenerationResponse, ProviderError> {
        let started = Instant::now();
        let features = &self.capabilities.features;
        let result = match params.validate() {
            Err(e) => Err(e),
            Ok(()) if !features.image_generation => Err(self.unsupported("image generation")),
            Ok(()) if params.source.is_some() && !features.image_edits => {
                Err(self.unsupported("image edits and variations"))
            }
            Ok(()) => {
                self.backend
                    .create_image(self.request(&params.model, cancel), params)
                    .await
            }
        };
        self.finish("create_image", started, result)
    }
}
