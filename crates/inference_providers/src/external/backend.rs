//! Backend trait for wire protocol implementations
//!
//! A backend translates the normalized request types into one provider wire
//! format and back. Validation, capability gating and logging happen in
//! [`ExternalProvider`](super::ExternalProvider) before a backend is called.

use crate::capabilities::ProviderCapabilities;
use crate::classifier::ErrorContext;
use crate::errors::ProviderError;
use crate::http::HttpExchange;
use crate::models::{
    ChatCompletionParams, ChatCompletionResponse, EmbeddingParams, EmbeddingResponse,
    ImageGenerationParams, ImageGenerationResponse, ModelsResponse,
};
use crate::StreamingResult;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for a backend connection
#[derive(Clone)]
pub struct BackendConfig {
    /// Provider id from the capability registry
    pub provider: String,
    /// Base URL for the provider API, templates already expanded
    pub base_url: String,
    /// Empty for key-less providers
    pub api_key: String,
    pub timeout_seconds: u64,
    /// Provider-specific settings (organization_id, api_version, anthropic_version, ...)
    pub extra: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            timeout_seconds: 120,
            extra: HashMap::new(),
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("extra", &self.extra)
            .finish()
    }
}

impl BackendConfig {
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Everything a backend needs for one call
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub config: &'a BackendConfig,
    /// Capabilities already narrowed to `model`
    pub capabilities: &'a ProviderCapabilities,
    /// Provider model id sent on the wire
    pub model: &'a str,
    /// Caller-facing alias echoed in responses
    pub alias: &'a str,
    pub cancel: &'a CancellationToken,
}

impl<'a> BackendRequest<'a> {
    pub fn error_context(&self) -> ErrorContext {
        ErrorContext::new(&self.config.provider, self.model)
    }

    pub fn exchange(&self, client: &Client) -> HttpExchange {
        HttpExchange::new(
            client.clone(),
            self.error_context(),
            Duration::from_secs(self.config.timeout_seconds),
        )
    }

    pub fn unsupported(&self, backend: &str, operation: &str) -> ProviderError {
        ProviderError::model_unavailable(
            self.model,
            &self.config.provider,
            format!("{operation} is not supported by the {backend} backend"),
        )
    }
}

/// Internal backend trait for different API formats
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Returns the backend type identifier (e.g., "openai_compatible", "anthropic")
    fn backend_type(&self) -> &'static str;

    async fn chat_completion(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, ProviderError>;

    /// Open a streaming completion; failures before the first byte are
    /// returned here, later ones arrive as stream items
    async fn chat_completion_stream(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<StreamingResult, ProviderError>;

    async fn create_embedding(
        &self,
        request: BackendRequest<'_>,
        _params: &EmbeddingParams,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Err(request.unsupported(self.backend_type(), "embeddings"))
    }

    async fn create_image(
        &self,
        request: BackendRequest<'_>,
        _params: &ImageGenerationParams,
    ) -> Result<ImageGenerationResponse, ProviderError> {
        Err(request.unsupported(self.backend_type(), "image generation"))
    }

    /// Models the upstream advertises; empty when the API has no listing
    async fn list_models(
        &self,
        _request: BackendRequest<'_>,
    ) -> Result<ModelsResponse, ProviderError> {
        Ok(ModelsResponse {
            object: "list".to_string(),
            data: vec![],
        })
    }
}
