//! Model alias routing with sequential fallback
//!
//! A [`ModelRouter`] maps caller-facing aliases to provider adapters. Each
//! request walks the alias itself and then its configured fallbacks, one
//! candidate at a time, stopping at the first success. Only errors that
//! another provider could plausibly avoid (communication failures and
//! unavailable models) advance the walk.

use config::{
    validate_fallbacks, Capability, ConfigError, FallbackConfiguration, GatewayConfig,
    HttpConfig, ModelProviderMapping, ProviderSettings,
};
use inference_providers::http::{build_client, HttpClientSettings};
use inference_providers::{
    AdapterFactory, ChatCompletionParams, ChatCompletionResponse, EmbeddingParams,
    EmbeddingResponse, ExternalProviderConfig, FeatureOverrides, ImageGenerationParams,
    ImageGenerationResponse, InferenceProvider, ProviderError, StreamingResult, UsageRecord,
};
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

type InferenceProviderTrait = dyn InferenceProvider;

#[derive(Debug, Error)]
pub enum RouterBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create adapter for model alias '{alias}': {source}")]
    Adapter {
        alias: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] ProviderError),

    #[error("Model alias '{0}' is registered more than once")]
    DuplicateAlias(String),

    #[error("Default for {capability:?} points at unknown model alias '{alias}'")]
    UnknownDefault { capability: Capability, alias: String },
}

/// A successful routed call and where it was served
#[derive(Debug)]
pub struct Routed<T> {
    pub value: T,
    /// Alias of the candidate that answered (differs from the request after a fallback)
    pub alias: String,
    pub provider: String,
    pub provider_model: String,
    /// `provider/model` of every candidate that failed before this one
    pub attempted: Vec<String>,
    /// Fallback aliases passed over because they are disabled or unknown
    pub skipped: Vec<String>,
    pub usage: Option<UsageRecord>,
}

impl<T> Routed<T> {
    pub fn used_fallback(&self) -> bool {
        !self.attempted.is_empty()
    }
}

struct Route {
    /// `None` when the mapping is disabled
    provider: Option<Arc<InferenceProviderTrait>>,
}

pub struct ModelRouter {
    routes: HashMap<String, Route>,
    fallbacks: HashMap<String, Vec<String>>,
    defaults: HashMap<Capability, String>,
}

/// Collects routes and fallbacks, then validates them into a [`ModelRouter`]
#[derive(Default)]
pub struct RouterBuilder {
    routes: Vec<(String, Route)>,
    fallbacks: Vec<FallbackConfiguration>,
    defaults: Vec<(Capability, String)>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `alias` with `provider`
    pub fn register(
        mut self,
        alias: impl Into<String>,
        provider: Arc<InferenceProviderTrait>,
    ) -> Self {
        self.routes.push((
            alias.into(),
            Route {
                provider: Some(provider),
            },
        ));
        self
    }

    /// Known alias that is currently switched off
    pub fn register_disabled(mut self, alias: impl Into<String>) -> Self {
        self.routes.push((alias.into(), Route { provider: None }));
        self
    }

    pub fn set_fallbacks(mut self, primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        self.fallbacks.push(FallbackConfiguration {
            primary: primary.into(),
            fallbacks,
        });
        self
    }

    pub fn set_default(mut self, capability: Capability, alias: impl Into<String>) -> Self {
        self.defaults.push((capability, alias.into()));
        self
    }

    /// Create one adapter per enabled mapping
    pub fn from_config(
        config: &GatewayConfig,
        factory: &AdapterFactory,
    ) -> Result<Self, RouterBuildError> {
        config.validate()?;

        let mut builder = Self::new();
        for mapping in &config.models {
            for capability in &mapping.default_for {
                builder = builder.set_default(*capability, mapping.alias.clone());
            }
            if !mapping.enabled {
                tracing::info!(
                    alias = %mapping.alias,
                    "Model mapping disabled, not creating adapter"
                );
                builder = builder.register_disabled(mapping.alias.clone());
                continue;
            }

            let settings = config.providers.get(&mapping.provider).ok_or_else(|| {
                ConfigError::UnknownProvider {
                    alias: mapping.alias.clone(),
                    provider: mapping.provider.clone(),
                }
            })?;
            let adapter_config = adapter_config(mapping, settings, &config.http);
            let provider = factory
                .create(adapter_config)
                .map_err(|source| RouterBuildError::Adapter {
                    alias: mapping.alias.clone(),
                    source,
                })?;

            tracing::info!(
                alias = %mapping.alias,
                provider = %provider.provider_name(),
                model = %provider.model_name(),
                "Registered model route"
            );
            builder = builder.register(mapping.alias.clone(), provider);
        }

        for fallback in &config.fallbacks {
            builder = builder.set_fallbacks(fallback.primary.clone(), fallback.fallbacks.clone());
        }
        Ok(builder)
    }

    pub fn build(self) -> Result<ModelRouter, RouterBuildError> {
        validate_fallbacks(&self.fallbacks)?;

        let mut routes = HashMap::new();
        for (alias, route) in self.routes {
            if routes.contains_key(&alias) {
                return Err(RouterBuildError::DuplicateAlias(alias));
            }
            routes.insert(alias, route);
        }

        let mut defaults = HashMap::new();
        for (capability, alias) in self.defaults {
            if !routes.contains_key(&alias) {
                return Err(RouterBuildError::UnknownDefault { capability, alias });
            }
            defaults.insert(capability, alias);
        }

        let fallbacks = self
            .fallbacks
            .into_iter()
            .map(|f| (f.primary, f.fallbacks))
            .collect();

        Ok(ModelRouter {
            routes,
            fallbacks,
            defaults,
        })
    }
}

/// Plain configuration values into the adapter factory's input
fn adapter_config(
    mapping: &ModelProviderMapping,
    settings: &ProviderSettings,
    http: &HttpConfig,
) -> ExternalProviderConfig {
    let overrides = FeatureOverrides {
        streaming: mapping.capabilities.streaming,
        vision: mapping.capabilities.vision,
        function_calling: mapping.capabilities.function_calling,
        embeddings: mapping.capabilities.embeddings,
        image_generation: mapping.capabilities.image_generation,
    };

    let mut adapter = ExternalProviderConfig::new(
        settings.provider.clone(),
        mapping.provider_model.clone(),
        settings.api_key.clone(),
    )
    .with_timeout(settings.timeout_seconds.unwrap_or(http.request_timeout_seconds))
    .with_feature_overrides(overrides);
    if let Some(base_url) = &settings.base_url {
        adapter = adapter.with_base_url(base_url.clone());
    }
    for (key, value) in &settings.extra {
        adapter = adapter.with_extra(key.clone(), value.clone());
    }
    adapter
}

pub fn http_client_settings(http: &HttpConfig) -> HttpClientSettings {
    HttpClientSettings {
        connect_timeout_seconds: http.connect_timeout_seconds,
        pool_idle_timeout_seconds: http.pool_idle_timeout_seconds,
        pool_max_idle_per_host: http.pool_max_idle_per_host,
        request_timeout_seconds: http.request_timeout_seconds,
        ..HttpClientSettings::default()
    }
}

static URL_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)]+").ok());
static IP_PORT_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}:\d+\b").ok());
static IP_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").ok());
static HOST_PORT_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\b[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?",
        r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+:\d{1,5}\b",
    ))
    .ok()
});

/// Strip URLs, addresses and `host:port` pairs from messages that reach the caller
fn sanitize_error_message(error: &str) -> String {
    let mut sanitized = error.to_string();

    for (regex, replacement) in [
        (&URL_REGEX, "[URL_REDACTED]"),
        (&IP_PORT_REGEX, "[IP_REDACTED]"),
        (&IP_REGEX, "[IP_REDACTED]"),
        (&HOST_PORT_REGEX, "[HOST_REDACTED]"),
    ] {
        if let Some(regex) = regex.as_ref() {
            sanitized = regex.replace_all(&sanitized, replacement).to_string();
        }
    }

    sanitized.replace(
        "error sending request for url",
        "provider connection failed",
    )
}

impl ModelRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Build the shared HTTP client and one adapter per enabled mapping
    pub fn from_config(config: &GatewayConfig) -> Result<Self, RouterBuildError> {
        let client = build_client(&http_client_settings(&config.http))
            .map_err(RouterBuildError::HttpClient)?;
        RouterBuilder::from_config(config, &AdapterFactory::new(client))?.build()
    }

    /// Enabled aliases, sorted
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, route)| route.provider.is_some())
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    pub fn provider(&self, alias: &str) -> Option<Arc<InferenceProviderTrait>> {
        self.routes.get(alias)?.provider.clone()
    }

    /// Alias marked as the default for `capability`, if it is enabled
    pub fn resolve_default(&self, capability: Capability) -> Option<&str> {
        let alias = self.defaults.get(&capability)?;
        self.routes
            .get(alias)
            .and_then(|route| route.provider.as_ref())
            .map(|_| alias.as_str())
    }

    /// The alias itself, then its fallbacks in order
    fn candidates<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a str> {
        std::iter::once(alias).chain(
            self.fallbacks
                .get(alias)
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
    }

    async fn route<T, F, Fut>(
        &self,
        alias: &str,
        operation: &'static str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<Routed<T>, ProviderError>
    where
        F: Fn(Arc<InferenceProviderTrait>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.routes.contains_key(alias) && !self.fallbacks.contains_key(alias) {
            tracing::warn!(alias = %alias, operation, "Unknown model alias");
            return Err(ProviderError::validation(format!(
                "model alias '{alias}' is not configured"
            )));
        }

        let mut attempted = Vec::new();
        let mut skipped = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        for candidate in self.candidates(alias) {
            let Some(provider) = self.routes.get(candidate).and_then(|r| r.provider.clone())
            else {
                tracing::warn!(
                    alias = %alias,
                    candidate = %candidate,
                    operation,
                    "Skipping disabled or unknown candidate"
                );
                skipped.push(candidate.to_string());
                continue;
            };

            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled());
            }

            let label = format!("{}/{}", provider.provider_name(), provider.model_name());
            tracing::debug!(
                alias = %alias,
                candidate = %candidate,
                provider = %provider.provider_name(),
                model = %provider.model_name(),
                attempt = attempted.len() + 1,
                operation,
                "Trying candidate"
            );

            match call(provider.clone()).await {
                Ok(value) => {
                    if !attempted.is_empty() {
                        tracing::info!(
                            alias = %alias,
                            served_by = %candidate,
                            attempt = attempted.len() + 1,
                            operation,
                            "Request served by fallback candidate"
                        );
                    }
                    return Ok(Routed {
                        value,
                        alias: candidate.to_string(),
                        provider: provider.provider_name().to_string(),
                        provider_model: provider.model_name().to_string(),
                        attempted,
                        skipped,
                        usage: None,
                    });
                }
                Err(e) if e.is_fallback_eligible() => {
                    tracing::warn!(
                        alias = %alias,
                        candidate = %candidate,
                        attempt = attempted.len() + 1,
                        operation,
                        kind = %e.kind(),
                        status = ?e.status_code(),
                        rate_limited = e.is_rate_limited(),
                        "Candidate failed, will try next candidate if available"
                    );
                    attempted.push(label);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(error) = last_error else {
            tracing::error!(alias = %alias, skipped = ?skipped, operation, "No enabled candidate");
            return Err(ProviderError::configuration(format!(
                "no enabled provider for model alias '{alias}' (skipped: {})",
                skipped.join(", ")
            )));
        };

        tracing::error!(
            alias = %alias,
            candidates_tried = attempted.len(),
            operation,
            "All candidates failed for model alias"
        );
        let tried = attempted.len();
        Err(error
            .map_message(|message| {
                sanitize_error_message(&format!(
                    "all {tried} candidate(s) failed for model alias '{alias}', \
                     last error: {message}"
                ))
            })
            .with_attempted(attempted))
    }

    pub async fn chat_completion(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<Routed<ChatCompletionResponse>, ProviderError> {
        let mut routed = self
            .route(&params.model, "chat_completion", cancel, |provider| async move {
                provider.chat_completion(params, cancel).await
            })
            .await?;
        routed.usage = routed.value.usage_record(&routed.provider);
        Ok(routed)
    }

    /// Only failures before the stream opens trigger a fallback
    pub async fn chat_completion_stream(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<Routed<StreamingResult>, ProviderError> {
        self.route(&params.model, "chat_completion_stream", cancel, |provider| async move {
            provider.chat_completion_stream(params, cancel).await
        })
        .await
    }

    pub async fn create_embedding(
        &self,
        params: &EmbeddingParams,
        cancel: &CancellationToken,
    ) -> Result<Routed<EmbeddingResponse>, ProviderError> {
        let mut routed = self
            .route(&params.model, "create_embedding", cancel, |provider| async move {
                provider.create_embedding(params, cancel).await
            })
            .await?;
        routed.usage = Some(routed.value.usage_record(&routed.provider));
        Ok(routed)
    }

    pub async fn create_image(
        &self,
        params: &ImageGenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Routed<ImageGenerationResponse>, ProviderError> {
        self.route(&params.model, "create_image", cancel, |provider| async move {
            provider.create_image(params, cancel).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use inference_providers::mock::{MockOutcome, ResponseTemplate};
    use inference_providers::{ChatMessage, EmbeddingInput, ErrorKind, MockProvider};

    fn params(alias: &str) -> ChatCompletionParams {
        ChatCompletionParams::new(alias, vec![ChatMessage::user("hi")])
    }

    fn ok(provider: &str, model: &str) -> Arc<MockProvider> {
        Arc::new(MockProvider::new(provider, model))
    }

    fn failing(provider: &str, model: &str, error: ProviderError) -> Arc<MockProvider> {
        Arc::new(MockProvider::failing(provider, model, error))
    }

    fn router(routes: &[(&str, Arc<MockProvider>)], fallbacks: &[(&str, &[&str])]) -> ModelRouter {
        let mut builder = ModelRouter::builder();
        for (alias, provider) in routes {
            builder = builder.register(*alias, provider.clone() as Arc<InferenceProviderTrait>);
        }
        for (primary, list) in fallbacks {
            builder = builder.set_fallbacks(*primary, list.iter().map(|s| s.to_string()).collect());
        }
        builder.build().unwrap()
    }

    // ==================== Fallback Walk Tests ====================

    #[tokio::test]
    async fn test_fallback_to_third_candidate() {
        let a = failing("openai", "gpt-4o", ProviderError::communication("connection reset"));
        let b = failing(
            "anthropic",
            "claude-3-opus",
            ProviderError::model_unavailable("claude-3-opus", "anthropic", ""),
        );
        let c = ok("groq", "llama-3.1-70b");
        let router = router(
            &[("a", a.clone()), ("b", b.clone()), ("c", c.clone())],
            &[("a", &["b", "c"])],
        );

        let routed = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.alias, "c");
        assert_eq!(routed.provider, "groq");
        assert_eq!(routed.attempted, vec!["openai/gpt-4o", "anthropic/claude-3-opus"]);
        assert!(routed.used_fallback());
        assert_eq!(routed.value.model, "a");
        assert_eq!(routed.usage.as_ref().unwrap().provider, "groq");
        assert_eq!(routed.usage.as_ref().unwrap().model, "llama-3.1-70b");
        assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_validation_error_never_falls_back() {
        let a = failing(
            "openai",
            "gpt-4o",
            ProviderError::validation("messages must not be empty"),
        );
        let b = ok("anthropic", "claude");
        let c = ok("groq", "llama");
        let router = router(
            &[("a", a.clone()), ("b", b.clone()), ("c", c.clone())],
            &[("a", &["b", "c"])],
        );

        let err = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.attempted().is_empty());
        assert_eq!(b.call_count(), 0);
        assert_eq!(c.call_count(), 0);
    }

    #[tokio::test]
    async fn test_configuration_error_never_falls_back() {
        let a = failing("openai", "gpt-4o", ProviderError::configuration("check API key"));
        let b = ok("anthropic", "claude");
        let router = router(&[("a", a), ("b", b.clone())], &[("a", &["b"])]);

        let err = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_with_attempted() {
        let a = failing(
            "openai",
            "gpt-4o",
            ProviderError::communication(
                "error sending request for url (http://10.0.0.5:8000/v1/chat)",
            ),
        );
        let b = failing(
            "groq",
            "llama",
            ProviderError::communication("rate limited").with_status(429).with_rate_limited(),
        );
        let router = router(&[("a", a), ("b", b)], &[("a", &["b"])]);

        let err = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
        assert_eq!(err.status_code(), Some(429));
        assert!(err.is_rate_limited());
        assert_eq!(err.attempted(), ["openai/gpt-4o", "groq/llama"]);
        assert!(err.message().contains("all 2 candidate(s) failed"));
        assert!(err.to_string().contains("attempted: openai/gpt-4o, groq/llama"));
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_fallbacks_are_skipped() {
        let a = failing("openai", "gpt-4o", ProviderError::communication("down"));
        let c = ok("groq", "llama");
        let router = ModelRouter::builder()
            .register("a", a as Arc<InferenceProviderTrait>)
            .register_disabled("b")
            .register("c", c as Arc<InferenceProviderTrait>)
            .set_fallbacks("a", vec!["b".to_string(), "ghost".to_string(), "c".to_string()])
            .build()
            .unwrap();

        let routed = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.alias, "c");
        assert_eq!(routed.skipped, vec!["b", "ghost"]);
        assert_eq!(routed.attempted, vec!["openai/gpt-4o"]);
    }

    #[tokio::test]
    async fn test_unknown_alias_is_validation_error() {
        let router = router(&[("a", ok("openai", "gpt-4o"))], &[]);
        let err = router
            .chat_completion(&params("nope"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_only_disabled_candidates_is_configuration_error() {
        let router = ModelRouter::builder().register_disabled("a").build().unwrap();
        let err = router
            .chat_completion(&params("a"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("skipped: a"));
    }

    #[tokio::test]
    async fn test_cancelled_before_fallback() {
        let a = failing("openai", "gpt-4o", ProviderError::communication("down"));
        let b = ok("groq", "llama");
        let router = router(&[("a", a), ("b", b.clone())], &[("a", &["b"])]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = router.chat_completion(&params("a"), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(b.call_count(), 0);
    }

    // ==================== Operation Tests ====================

    #[tokio::test]
    async fn test_stream_falls_back_before_open() {
        let a = failing("openai", "gpt-4o", ProviderError::communication("503"));
        let b = Arc::new(MockProvider::with_outcome(
            "anthropic",
            "claude",
            MockOutcome::Respond(ResponseTemplate::new("hello there")),
        ));
        let router = router(&[("a", a), ("b", b)], &[("a", &["b"])]);

        let routed = router
            .chat_completion_stream(&params("a"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.provider, "anthropic");
        let chunks: Vec<_> = routed.value.collect().await;
        assert!(chunks.iter().all(|c| c.is_ok()));
        assert!(chunks.last().unwrap().as_ref().unwrap().usage.is_some());
    }

    #[tokio::test]
    async fn test_embedding_usage_record() {
        let router = router(&[("embed", ok("openai", "text-embedding-3-small"))], &[]);
        let params = EmbeddingParams::new("embed", EmbeddingInput::Single("one two".to_string()));

        let routed = router
            .create_embedding(&params, &CancellationToken::new())
            .await
            .unwrap();
        let usage = routed.usage.unwrap();
        assert_eq!(usage.alias, "embed");
        assert_eq!(usage.model, "text-embedding-3-small");
        assert_eq!(usage.completion_tokens, 0);
    }

    #[tokio::test]
    async fn test_image_routing() {
        let router = router(&[("painter", ok("openai", "dall-e-3"))], &[]);
        let params = ImageGenerationParams::new("painter", "a fox");
        let routed = router
            .create_image(&params, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routed.value.model, "painter");
        assert!(routed.usage.is_none());
    }

    // ==================== Builder Tests ====================

    #[test]
    fn test_resolve_default() {
        let router = ModelRouter::builder()
            .register(
                "embed",
                ok("openai", "text-embedding-3-small") as Arc<InferenceProviderTrait>,
            )
            .register_disabled("images")
            .set_default(Capability::Embeddings, "embed")
            .set_default(Capability::ImageGeneration, "images")
            .build()
            .unwrap();

        assert_eq!(router.resolve_default(Capability::Embeddings), Some("embed"));
        assert_eq!(router.resolve_default(Capability::ImageGeneration), None);
        assert_eq!(router.resolve_default(Capability::Chat), None);
        assert_eq!(router.aliases(), vec!["embed"]);
    }

    #[test]
    fn test_builder_rejects_cycle() {
        let result = ModelRouter::builder()
            .register("a", ok("openai", "m1") as Arc<InferenceProviderTrait>)
            .register("b", ok("openai", "m2") as Arc<InferenceProviderTrait>)
            .set_fallbacks("a", vec!["b".to_string()])
            .set_fallbacks("b", vec!["a".to_string()])
            .build();
        assert!(matches!(result, Err(RouterBuildError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_duplicate_alias() {
        let result = ModelRouter::builder()
            .register("a", ok("openai", "m1") as Arc<InferenceProviderTrait>)
            .register("a", ok("openai", "m2") as Arc<InferenceProviderTrait>)
            .build();
        assert!(matches!(result, Err(RouterBuildError::DuplicateAlias(a)) if a == "a"));
    }

    #[test]
    fn test_from_config_creates_adapters() {
        let yaml = r#"
providers:
  openai-main: { provider: openai, api_key: sk-test, timeout_seconds: 15 }
  anthropic-main: { provider: anthropic, api_key: sk-ant-test }
models:
  - { alias: smart, provider: openai-main, provider_model: gpt-4o, default_for: [chat] }
  - { alias: claude, provider: anthropic-main, provider_model: claude-3-5-sonnet-20241022 }
  - { alias: old, provider: openai-main, provider_model: gpt-3.5-turbo, enabled: false }
fallbacks:
  - { primary: smart, fallbacks: [claude, old] }
"#;
        let config = GatewayConfig::from_yaml_str(yaml, |_| None).unwrap();
        let router = ModelRouter::from_config(&config).unwrap();

        assert_eq!(router.aliases(), vec!["claude", "smart"]);
        assert_eq!(router.resolve_default(Capability::Chat), Some("smart"));
        let claude = router.provider("claude").unwrap();
        assert_eq!(claude.provider_name(), "anthropic");
        assert_eq!(claude.model_name(), "claude-3-5-sonnet-20241022");
        assert!(router.provider("old").is_none());
    }

    #[test]
    fn test_from_config_reports_adapter_failure() {
        let yaml = r#"
providers:
  broken: { provider: not-a-provider, api_key: x }
models:
  - { alias: smart, provider: broken, provider_model: gpt-4o }
"#;
        let config = GatewayConfig::from_yaml_str(yaml, |_| None).unwrap();
        let err = ModelRouter::from_config(&config).err().unwrap();
        assert!(matches!(err, RouterBuildError::Adapter { ref alias, .. } if alias == "smart"));
    }

    // ==================== Sanitization Tests ====================

    #[test]
    fn test_sanitize_error_message() {
        let error =
            "Failed: error sending request for url (http://192.168.0.1:8000/v1/chat/completions)";
        let sanitized = sanitize_error_message(error);
        assert!(!sanitized.contains("http://"));
        assert!(!sanitized.contains("192.168.0.1"));
        assert!(sanitized.contains("[URL_REDACTED]"));
        assert!(sanitized.contains("provider connection failed"));

        let sanitized = sanitize_error_message("Connection failed to 192.168.1.100:8080");
        assert!(!sanitized.contains("8080"));
        assert!(sanitized.contains("[IP_REDACTED]"));

        let sanitized =
            sanitize_error_message("Server at 10.0.0.1 returned HTTP 401 Unauthorized");
        assert!(!sanitized.contains("10.0.0.1"));
        assert!(sanitized.contains("401 Unauthorized"));
    }

    #[test]
    fn test_sanitize_redacts_host_and_port() {
        let sanitized =
            sanitize_error_message("failed to connect to llm-internal.corp.example:8443 refused");
        assert!(!sanitized.contains("llm-internal.corp.example"));
        assert!(!sanitized.contains("8443"));
        assert_eq!(sanitized, "failed to connect to [HOST_REDACTED] refused");

        // Model ids and ratios stay readable
        let untouched = "model llama3.1:8b on openai/gpt-4o-2024-08-06 at 2:1";
        assert_eq!(sanitize_error_message(untouched), untouched);
    }
}
