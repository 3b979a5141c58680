//! Mock implementation of InferenceProvider for testing
//!
//! Scripted successes and failures with call counting, so routing and
//! fallback logic can be exercised without any upstream.

use crate::capabilities::{self, narrow_for_model, FeatureOverrides};
use crate::chunk_builder::ChunkContext;
use crate::errors::ProviderError;
use crate::mapping::{new_completion_id, now_timestamp};
use crate::models::{
    ChatCompletionParams, ChatCompletionResponse, ChatCompletionResponseChoice,
    ChatResponseMessage, Embedding, EmbeddingInput, EmbeddingParams, EmbeddingResponse,
    FinishReason, ImageData, ImageGenerationParams, ImageGenerationResponse, MessageContent,
    MessageRole, ModelInfo, ModelsResponse, TokenUsage,
};
use crate::{InferenceProvider, ProviderCapabilities, StreamingResult};
use async_trait::async_trait;
use futures_util::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Request matcher for conditional responses
#[derive(Clone)]
pub enum RequestMatcher {
    /// Match any request
    Any,
    /// Match requests whose message text, joined by spaces, equals the prompt
    ExactPrompt(String),
}

impl RequestMatcher {
    pub fn matches(&self, params: &ChatCompletionParams) -> bool {
        match self {
            Self::Any => true,
            Self::ExactPrompt(prompt) => Self::extract_text(params) == *prompt,
        }
    }

    fn extract_text(params: &ChatCompletionParams) -> String {
        params
            .messages
            .iter()
            .filter_map(|msg| msg.content.as_ref().map(MessageContent::text))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Template for generating responses
#[derive(Clone)]
pub struct ResponseTemplate {
    content: String,
    reasoning_content: Option<String>,
    /// Stream ends after N content chunks without a finish chunk
    disconnect_after_chunks: Option<usize>,
    /// Stream yields this error after N content chunks
    error_after_chunks: Option<(usize, ProviderError)>,
    delay: Option<Duration>,
}

impl ResponseTemplate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning_content: None,
            disconnect_after_chunks: None,
            error_after_chunks: None,
            delay: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = Some(reasoning.into());
        self
    }

    /// Simulate an upstream that hangs up after N chunks
    pub fn with_disconnect_after(mut self, chunks: usize) -> Self {
        self.disconnect_after_chunks = Some(chunks);
        self
    }

    /// Simulate a mid-stream failure after N chunks
    pub fn with_error_after(mut self, chunks: usize, error: ProviderError) -> Self {
        self.error_after_chunks = Some((chunks, error));
        self
    }

    /// Wait before answering; cancellation during the wait is honoured
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn output_tokens(&self) -> i32 {
        self.content.split_whitespace().count() as i32
    }

    fn generate_response(
        &self,
        alias: &str,
        provider_model: &str,
        input_tokens: i32,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: new_completion_id(),
            object: "chat.completion".to_string(),
            created: now_timestamp(),
            model: alias.to_string(),
            provider_model: Some(provider_model.to_string()),
            choices: vec![ChatCompletionResponseChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: MessageRole::Assistant,
                    content: Some(self.content.clone()),
                    tool_calls: None,
                    refusal: None,
                    reasoning_content: self.reasoning_content.clone(),
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(TokenUsage::new(input_tokens, self.output_tokens())),
            system_fingerprint: None,
            seed: None,
        }
    }

    /// Role chunk, one chunk per word, then a finish chunk with usage
    fn generate_chunks(
        &self,
        alias: &str,
        provider_model: &str,
        input_tokens: i32,
    ) -> Vec<Result<crate::ChatCompletionChunk, ProviderError>> {
        let ctx = ChunkContext::new(
            new_completion_id(),
            alias.to_string(),
            provider_model.to_string(),
            now_timestamp(),
        );

        let mut content = Vec::new();
        if let Some(reasoning) = &self.reasoning_content {
            content.push(ctx.reasoning_chunk(reasoning.clone()));
        }
        for (i, word) in self.content.split_whitespace().enumerate() {
            let text = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            content.push(ctx.text_chunk(text));
        }

        let mut chunks = vec![Ok(ctx.role_chunk())];
        if let Some((after, error)) = &self.error_after_chunks {
            chunks.extend(content.into_iter().take(*after).map(Ok));
            chunks.push(Err(error.clone()));
            return chunks;
        }
        if let Some(after) = self.disconnect_after_chunks {
            chunks.extend(content.into_iter().take(after).map(Ok));
            return chunks;
        }
        chunks.extend(content.into_iter().map(Ok));
        chunks.push(Ok(ctx.finish_chunk(
            Some(FinishReason::Stop),
            Some(TokenUsage::new(input_tokens, self.output_tokens())),
        )));
        chunks
    }
}

/// What the mock does when a request matches
#[derive(Clone)]
pub enum MockOutcome {
    Respond(ResponseTemplate),
    Fail(ProviderError),
}

struct MockExpectation {
    matcher: RequestMatcher,
    outcome: MockOutcome,
}

struct MockConfig {
    expectations: Vec<MockExpectation>,
    default_outcome: MockOutcome,
}

/// Builder for configuring a single expectation
pub struct MockExpectationBuilder {
    config: Arc<Mutex<MockConfig>>,
    matcher: RequestMatcher,
}

impl MockExpectationBuilder {
    pub async fn respond_with(self, response: ResponseTemplate) {
        self.push(MockOutcome::Respond(response)).await;
    }

    pub async fn fail_with(self, error: ProviderError) {
        self.push(MockOutcome::Fail(error)).await;
    }

    async fn push(self, outcome: MockOutcome) {
        let mut config = self.config.lock().await;
        config.expectations.push(MockExpectation {
            matcher: self.matcher,
            outcome,
        });
    }
}

/// Mock provider that implements InferenceProvider for testing
pub struct MockProvider {
    provider: String,
    model: String,
    models: Vec<ModelInfo>,
    config: Arc<Mutex<MockConfig>>,
    calls: AtomicUsize,
    last_params: Mutex<Option<ChatCompletionParams>>,
}

impl MockProvider {
    /// A provider answering every request with a short default text
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_outcome(provider, model, MockOutcome::Respond(ResponseTemplate::new("1. 2. 3.")))
    }

    /// A provider failing every request with `error`
    pub fn failing(
        provider: impl Into<String>,
        model: impl Into<String>,
        error: ProviderError,
    ) -> Self {
        Self::with_outcome(provider, model, MockOutcome::Fail(error))
    }

    pub fn with_outcome(
        provider: impl Into<String>,
        model: impl Into<String>,
        outcome: MockOutcome,
    ) -> Self {
        let provider = provider.into();
        let model = model.into();
        let models = vec![ModelInfo {
            id: model.clone(),
            object: "model".to_string(),
            created: 1762544256,
            owned_by: provider.clone(),
        }];
        Self {
            provider,
            model,
            models,
            config: Arc::new(Mutex::new(MockConfig {
                expectations: Vec::new(),
                default_outcome: outcome,
            })),
            calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    /// Add a conditional outcome for a specific matcher
    pub fn when(&self, matcher: RequestMatcher) -> MockExpectationBuilder {
        MockExpectationBuilder {
            config: self.config.clone(),
            matcher,
        }
    }

    pub async fn set_default_outcome(&self, outcome: MockOutcome) {
        self.config.lock().await.default_outcome = outcome;
    }

    /// Number of operations invoked on this provider
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters of the most recent chat request
    pub async fn last_params(&self) -> Option<ChatCompletionParams> {
        self.last_params.lock().await.clone()
    }

    async fn resolve(&self, params: Option<&ChatCompletionParams>) -> MockOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(params) = params {
            *self.last_params.lock().await = Some(params.clone());
        }
        let config = self.config.lock().await;
        params
            .and_then(|p| config.expectations.iter().find(|exp| exp.matcher.matches(p)))
            .map(|exp| exp.outcome.clone())
            .unwrap_or_else(|| config.default_outcome.clone())
    }

    /// Resolve the outcome and honour delay and cancellation
    async fn template(
        &self,
        params: Option<&ChatCompletionParams>,
        cancel: &CancellationToken,
    ) -> Result<ResponseTemplate, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }
        let template = match self.resolve(params).await {
            MockOutcome::Respond(template) => template,
            MockOutcome::Fail(error) => return Err(error),
        };
        if let Some(delay) = template.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(template)
    }

    fn input_tokens(params: &ChatCompletionParams) -> i32 {
        let words: i32 = params
            .messages
            .iter()
            .filter_map(|m| m.content.as_ref())
            .map(|c| c.text().split_whitespace().count() as i32)
            .sum();
        words.max(6)
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn capabilities(&self, model_id: &str) -> ProviderCapabilities {
        let caps = capabilities::find(&self.provider).unwrap_or(&capabilities::all()[0]);
        narrow_for_model(caps, model_id, &FeatureOverrides::default())
    }

    async fn list_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ModelsResponse, ProviderError> {
        self.template(None, cancel).await?;
        Ok(ModelsResponse {
            object: "list".to_string(),
            data: self.models.clone(),
        })
    }

    async fn chat_completion(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let template = self.template(Some(params), cancel).await?;
        Ok(template.generate_response(&params.model, &self.model, Self::input_tokens(params)))
    }

    async fn chat_completion_stream(
        &self,
        params: &ChatCompletionParams,
        cancel: &CancellationToken,
    ) -> Result<StreamingResult, ProviderError> {
        let template = self.template(Some(params), cancel).await?;
        let chunks =
            template.generate_chunks(&params.model, &self.model, Self::input_tokens(params));
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn create_embedding(
        &self,
        params: &EmbeddingParams,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingResponse, ProviderError> {
        self.template(None, cancel).await?;
        let inputs = match &params.input {
            EmbeddingInput::Single(text) => vec![text.clone()],
            EmbeddingInput::Multiple(texts) => texts.clone(),
        };
        let dimensions = params.dimensions.unwrap_or(8) as usize;
        let prompt_tokens = inputs
            .iter()
            .map(|t| t.split_whitespace().count() as i32)
            .sum();
        Ok(EmbeddingResponse {
            object: "list".to_string(),
            model: params.model.clone(),
            provider_model: Some(self.model.clone()),
            data: inputs
                .iter()
                .enumerate()
                .map(|(index, text)| Embedding {
                    object: "embedding".to_string(),
                    index: index as i64,
                    embedding: vec![text.len() as f32; dimensions],
                })
                .collect(),
            usage: TokenUsage::new(prompt_tokens, 0),
        })
    }

    async fn create_image(
        &self,
        params: &ImageGenerationParams,
        cancel: &CancellationToken,
    ) -> Result<ImageGenerationResponse, ProviderError> {
        self.template(None, cancel).await?;
        let n = params.n.unwrap_or(1).max(1);
        Ok(ImageGenerationResponse {
            created: now_timestamp(),
            model: params.model.clone(),
            data: (0..n)
                .map(|i| ImageData {
                    url: Some(format!("https://images.example.com/{}/{i}.png", self.model)),
                    b64_json: None,
                    revised_prompt: None,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::ChatMessage;
    use futures_util::StreamExt;

    fn params(text: &str) -> ChatCompletionParams {
        ChatCompletionParams::new("alias", vec![ChatMessage::user(text)])
    }

    #[tokio::test]
    async fn test_default_response_echoes_alias() {
        let mock = MockProvider::new("openai", "gpt-4o");
        let response = mock
            .chat_completion(&params("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.model, "alias");
        assert_eq!(response.provider_model.as_deref(), Some("gpt-4o"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expectation_overrides_default() {
        let mock = MockProvider::new("openai", "gpt-4o");
        mock.when(RequestMatcher::ExactPrompt("fail please".to_string()))
            .fail_with(ProviderError::validation("nope"))
            .await;

        let cancel = CancellationToken::new();
        assert!(mock.chat_completion(&params("hello"), &cancel).await.is_ok());
        let err = mock
            .chat_completion(&params("fail please"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_yields_words_and_usage() {
        let mock = MockProvider::with_outcome(
            "openai",
            "gpt-4o",
            MockOutcome::Respond(ResponseTemplate::new("one two three")),
        );
        let chunks: Vec<_> = mock
            .chat_completion_stream(&params("count"), &CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        // role + 3 words + finish
        assert_eq!(chunks.len(), 5);
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert_eq!(last.usage.as_ref().unwrap().completion_tokens, 3);
    }

    #[tokio::test]
    async fn test_stream_error_after_chunks() {
        let mock = MockProvider::with_outcome(
            "openai",
            "gpt-4o",
            MockOutcome::Respond(
                ResponseTemplate::new("a b c d")
                    .with_error_after(2, ProviderError::communication("reset")),
            ),
        );
        let chunks: Vec<_> = mock
            .chat_completion_stream(&params("x"), &CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);
        assert!(chunks[3].is_err());
    }

    #[tokio::test]
    async fn test_delay_honours_cancellation() {
        let mock = MockProvider::with_outcome(
            "openai",
            "gpt-4o",
            MockOutcome::Respond(ResponseTemplate::new("late").with_delay(Duration::from_secs(30))),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = mock.chat_completion(&params("x"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
