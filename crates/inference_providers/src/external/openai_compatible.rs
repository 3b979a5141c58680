//! OpenAI-compatible backend implementation
//!
//! This backend handles providers that use OpenAI's API format, including:
//! - OpenAI (bearer key, optional organization header)
//! - Azure OpenAI (deployment URLs, `api-key` header, `api-version` query)
//! - Gemini, Bedrock and Cohere compatibility endpoints
//! - Groq, Mistral, Together, Fireworks, DeepSeek, OpenRouter, xAI, ...
//! - Key-less local runtimes such as Ollama

use super::backend::{BackendConfig, BackendRequest, ProviderBackend};
use crate::capabilities::{AuthScheme, FieldPlacement, ProviderCapabilities, WireBackend};
use crate::errors::ProviderError;
use crate::http::build_headers;
use crate::mapping::{
    build_chat_request, build_embedding_request, build_image_form, build_image_request,
    map_chat_response, map_embedding_response, map_image_response, map_models_response,
    map_stream_payload, OpenAiStreamPayload,
};
use crate::models::{
    ChatCompletionParams, ChatCompletionResponse, EmbeddingParams, EmbeddingResponse,
    ImageGenerationParams, ImageGenerationResponse, ImageSource, ModelsResponse,
};
use crate::sse_parser::new_sse_parser;
use crate::{stop_after_error, StreamingResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

/// Azure data-plane version used when none is configured
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// OpenAI-compatible backend
pub struct OpenAiCompatibleBackend {
    client: Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build_headers(
        config: &BackendConfig,
        caps: &ProviderCapabilities,
    ) -> Result<HeaderMap, ProviderError> {
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(header) = caps.auth.header_name {
            match caps.auth.scheme {
                AuthScheme::Bearer => pairs.push((header, format!("Bearer {}", config.api_key))),
                AuthScheme::Header => pairs.push((header, config.api_key.clone())),
                AuthScheme::None => {}
            }
        }

        for field in caps.auth.fields {
            if let FieldPlacement::Header(header) = field.placement {
                if let Some(value) = config.extra.get(field.name).filter(|v| !v.is_empty()) {
                    pairs.push((header, value.clone()));
                }
            }
        }

        build_headers(pairs)
    }

    /// Resolve an endpoint path for this provider
    ///
    /// Azure addresses deployments rather than models and versions every call.
    fn endpoint(request: &BackendRequest<'_>, path: &str) -> String {
        let config = request.config;
        match request.capabilities.backend {
            WireBackend::AzureOpenAi => {
                let version = config
                    .extra
                    .get("api_version")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_AZURE_API_VERSION);
                let path = path.trim_start_matches('/');
                let scoped = if path == "models" {
                    "openai/models".to_string()
                } else {
                    format!("openai/deployments/{}/{path}", request.model)
                };
                format!("{}?api-version={version}", config.url(&scoped))
            }
            _ => config.url(path),
        }
    }
}

#[async_trait]
impl ProviderBackend for OpenAiCompatibleBackend {
    fn backend_type(&self) -> &'static str {
        "openai_compatible"
    }

    async fn chat_completion(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let body = build_chat_request(params, request.model, request.capabilities, false)?;
        let headers = Self::build_headers(request.config, request.capabilities)?;
        let url = Self::endpoint(&request, "chat/completions");

        let bytes = request
            .exchange(&self.client)
            .send_json(Method::POST, &url, Some(&body), headers, request.cancel)
            .await?;

        Ok(map_chat_response(&bytes, request.alias, request.model))
    }

    async fn chat_completion_stream(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<StreamingResult, ProviderError> {
        let body = build_chat_request(params, request.model, request.capabilities, true)?;
        let headers = Self::build_headers(request.config, request.capabilities)?;
        let url = Self::endpoint(&request, "chat/completions");

        let exchange = request.exchange(&self.client);
        let response = exchange
            .send_streaming(&url, &body, headers, request.cancel)
            .await?;

        let ctx = request.error_context();
        let alias = request.alias.to_string();
        let model = request.model.to_string();
        let events =
            new_sse_parser::<OpenAiStreamPayload>(response, ctx.clone(), request.cancel.clone());
        let chunks = events.map(move |event| {
            event.and_then(|payload| map_stream_payload(payload, &alias, &model, &ctx))
        });

        Ok(Box::pin(stop_after_error(chunks)))
    }

    async fn create_embedding(
        &self,
        request: BackendRequest<'_>,
        params: &EmbeddingParams,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let body = build_embedding_request(params, request.model);
        let headers = Self::build_headers(request.config, request.capabilities)?;
        let url = Self::endpoint(&request, "embeddings");

        let bytes = request
            .exchange(&self.client)
            .send_json(Method::POST, &url, Some(&body), headers, request.cancel)
            .await?;

        map_embedding_response(&bytes, request.alias, request.model, params.input.len())
            .map_err(|e| e.with_context(&request.config.provider, request.model))
    }

    async fn create_image(
        &self,
        request: BackendRequest<'_>,
        params: &ImageGenerationParams,
    ) -> Result<ImageGenerationResponse, ProviderError> {
        let headers = Self::build_headers(request.config, request.capabilities)?;
        let exchange = request.exchange(&self.client);

        let bytes = match &params.source {
            None => {
                let body = build_image_request(params, request.model, request.capabilities);
                let url = Self::endpoint(&request, "images/generations");
                exchange
                    .send_json(Method::POST, &url, Some(&body), headers, request.cancel)
                    .await?
            }
            Some(source) => {
                let path = match source {
                    ImageSource::Edit { .. } => "images/edits",
                    ImageSource::Variation { .. } => "images/variations",
                };
                let form = build_image_form(params, source, request.model, request.capabilities)?;
                let url = Self::endpoint(&request, path);
                exchange
                    .send_multipart(&url, form, headers, request.cancel)
                    .await?
            }
        };

        map_image_response(&bytes, request.alias)
            .map_err(|e| e.with_context(&request.config.provider, request.model))
    }

    async fn list_models(
        &self,
        request: BackendRequest<'_>,
    ) -> Result<ModelsResponse, ProviderError> {
        let headers = Self::build_headers(request.config, request.capabilities)?;
        let url = Self::endpoint(&request, "models");

        let bytes = request
            .exchange(&self.client)
            .get_json(&url, headers, request.cancel)
            .await?;

        map_models_response(&bytes)
            .map_err(|e| e.with_context(&request.config.provider, request.model))
    }
}
