//! Anthropic backend implementation
//!
//! This backend handles HTTP communication with Anthropic's Messages API.
//! Format conversion is handled by the `converter` module.

mod converter;

use super::backend::{BackendConfig, BackendRequest, ProviderBackend};
use crate::errors::ProviderError;
use crate::http::build_headers;
use crate::mapping::map_models_response;
use crate::models::{ChatCompletionParams, ChatCompletionResponse, ModelsResponse};
use crate::sse_parser::new_sse_parser;
use crate::{stop_after_error, StreamingResult};
use async_trait::async_trait;
use converter::{build_request, map_response, AnthropicStreamEvent, AnthropicStreamState};
use futures_util::{future, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

pub use converter::DEFAULT_MAX_TOKENS;

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic backend - handles HTTP communication with Anthropic's API
pub struct AnthropicBackend {
    client: Client,
}

impl AnthropicBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build_headers(config: &BackendConfig) -> Result<HeaderMap, ProviderError> {
        let version = config
            .extra
            .get("anthropic_version")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string());

        build_headers([
            ("x-api-key", config.api_key.clone()),
            ("anthropic-version", version),
        ])
    }
}

#[async_trait]
impl ProviderBackend for AnthropicBackend {
    fn backend_type(&self) -> &'static str {
        "anthropic"
    }

    async fn chat_completion(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let body = build_request(params, request.model, request.capabilities, false)?;
        let headers = Self::build_headers(request.config)?;
        let url = request.config.url("messages");

        let bytes = request
            .exchange(&self.client)
            .send_json(Method::POST, &url, Some(&body), headers, request.cancel)
            .await?;

        Ok(map_response(&bytes, request.alias, request.model))
    }

    async fn chat_completion_stream(
        &self,
        request: BackendRequest<'_>,
        params: &ChatCompletionParams,
    ) -> Result<StreamingResult, ProviderError> {
        let body = build_request(params, request.model, request.capabilities, true)?;
        let headers = Self::build_headers(request.config)?;
        let url = request.config.url("messages");

        let response = request
            .exchange(&self.client)
            .send_streaming(&url, &body, headers, request.cancel)
            .await?;

        let ctx = request.error_context();
        let state = AnthropicStreamState::new(request.alias, request.model, ctx.clone());
        let events = new_sse_parser::<AnthropicStreamEvent>(response, ctx, request.cancel.clone());
        let chunks = events
            .scan(state, |state, event| {
                future::ready(Some(match event {
                    Ok(event) => state.map_event(event),
                    Err(e) => Some(Err(e)),
                }))
            })
            .filter_map(future::ready);

        Ok(Box::pin(stop_after_error(chunks)))
    }

    async fn list_models(
        &self,
        request: BackendRequest<'_>,
    ) -> Result<ModelsResponse, ProviderError> {
        let headers = Self::build_headers(request.config)?;
        let url = request.config.url("models");

        let bytes = request
            .exchange(&self.client)
            .get_json(&url, headers, request.cancel)
            .await?;

        map_models_response(&bytes)
            .map_err(|e| e.with_context(&request.config.provider, request.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities;
    use crate::errors::ErrorKind;
    use crate::models::{EmbeddingInput, EmbeddingParams};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn config(extra: &[(&str, &str)]) -> BackendConfig {
        BackendConfig {
            provider: "anthropic".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: "sk-ant-test".to_string(),
            timeout_seconds: 30,
            extra: extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_build_headers_default_version() {
        let headers = AnthropicBackend::build_headers(&config(&[])).unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(
            headers.get("anthropic-version").unwrap(),
            DEFAULT_ANTHROPIC_VERSION
        );
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn test_build_headers_custom_version() {
        let headers =
            AnthropicBackend::build_headers(&config(&[("anthropic_version", "2024-01-01")]))
                .unwrap();
        assert_eq!(headers.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[tokio::test]
    async fn test_embeddings_are_unsupported() {
        let backend = AnthropicBackend::new(Client::new());
        let config = config(&[]);
        let cancel = CancellationToken::new();
        let request = BackendRequest {
            config: &config,
            capabilities: capabilities::find("anthropic").unwrap(),
            model: "claude-3-haiku-20240307",
            alias: "claude",
            cancel: &cancel,
        };
        let params = EmbeddingParams::new("claude", EmbeddingInput::Single("hello".to_string()));

        let err = backend.create_embedding(request, &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert!(err.message().contains("embeddings"));
    }
}
