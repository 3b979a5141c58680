//! Inference providers crate: one normalized interface over many LLM APIs
//!
//! Callers speak a single OpenAI-shaped request/response vocabulary
//! ([`models`]); adapters translate it to each upstream's wire format,
//! normalize streaming events and classify failures into [`ProviderError`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use inference_providers::{
//!     AdapterFactory, ChatCompletionParams, ChatMessage, ExternalProviderConfig,
//! };
//! use inference_providers::http::{build_client, HttpClientSettings};
//! use futures_util::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let factory = AdapterFactory::new(build_client(&HttpClientSettings::default())?);
//! let provider = factory.create(ExternalProviderConfig::new(
//!     "anthropic",
//!     "claude-3-5-sonnet-20241022",
//!     api_key,
//! ))?;
//!
//! let params = ChatCompletionParams::new("claude", vec![ChatMessage::user("Hello")]);
//! let cancel = CancellationToken::new();
//! let mut stream = provider.chat_completion_stream(&params, &cancel).await?;
//! while let Some(chunk) = stream.next().await {
//!     match chunk {
//!         Ok(chunk) => {
//!             if let Some(delta) = chunk.choices.first().and_then(|c| c.delta.as_ref()) {
//!                 print!("{}", delta.content.as_deref().unwrap_or_default());
//!             }
//!         }
//!         Err(e) => eprintln!("Stream error: {e}"),
//!     }
//! }
//! ```

pub mod capabilities;
pub mod chunk_builder;
pub mod classifier;
pub mod errors;
pub mod external;
pub mod http;
pub mod mapping;
pub mod mock;
pub mod models;
pub mod sse_parser;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{future, StreamExt};
use tokio_util::sync::CancellationToken;

pub use capabilities::{FeatureOverrides, ProviderCapabilities};
pub use errors::{ErrorKind, ProviderError};
pub use external::{
    AdapterFactory, AnthropicBackend, ExternalProvider, ExternalProviderConfig,
    OpenAiCompatibleBackend,
};
pub use mock::MockProvider;
pub use models::{
    ChatChoice, ChatCompletionChunk, ChatCompletionParams, ChatCompletionResponse,
    ChatCompletionResponseChoice, ChatDelta, ChatMessage, ChatResponseMessage, ContentPart,
    EmbeddingInput, EmbeddingParams, EmbeddingResponse, FinishReason, ImageGenerationParams,
    ImageGenerationResponse, ImageSource, MessageContent, MessageRole, ModelInfo, ModelsResponse,
    TokenUsage, ToolChoice, ToolDefinition, UsageRecord,
};

/// Type alias for streaming completion results
///
/// Items arrive in upstream order. At most one `Err` is yielded, and it is
/// the last item.
pub type StreamingResult =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Send>>;

/// End a stream right after its first error
pub(crate) fn stop_after_error<S, T>(stream: S) -> impl Stream<Item = Result<T, ProviderError>>
where
    S: Stream<Item = Result<T, ProviderError>>,
{
    stream.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
    })
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Registry id of the upstream provider (e.g. "openai")
    fn provider_name(&self) -> &str;

    /// Provider model id this adapter sends on the wire
    fn model_name(&self) -> &str;

    /// Capabilities narrowed to `model_id` and this adapter's overrides
    fn capabilities(&self, model_id: &str) -> ProviderCapabilities;

    /// Models the upstream advertises; empty when it has no listing endpoint
    async fn list_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ModelsResponse, ProviderError>;

    async fn chat_completion(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResponse, ProviderError>;

    /// Performs a streaming chat completion request
    ///
    /// Failures before the upstream accepts the request are returned here;
    /// anything later arrives as the stream's final item.
    async fn chat_completion_stream(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<StreamingResult, ProviderError>;

    async fn create_embedding(
        &self,
        params: &EmbeddingParams,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError>;

    /// Generation, edit or variation depending on `params.source`
    async fn create_image(
        &self,
        params: &ImageGenerationParams,
        cancel: &CancellationToken,
    ) -> Result<ImageGenerationResponse, ProviderError>;
}
