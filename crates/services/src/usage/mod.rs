//! Usage capture and cost calculation
//!
//! All costs use a fixed scale of 9 (nano-dollars) and USD currency, so a
//! price of `$2.50 / 1M tokens` is stored as `2_500` per token.

use futures_util::Stream;
use inference_providers::{ChatCompletionChunk, ProviderError, UsageRecord};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Per-token prices in nano-dollars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: i64,
    pub output_cost_per_token: i64,
}

impl ModelPricing {
    pub fn new(input_cost_per_token: i64, output_cost_per_token: i64) -> Self {
        Self {
            input_cost_per_token,
            output_cost_per_token,
        }
    }

    /// From the usual "dollars per million tokens" quote
    pub fn per_million_usd(input: f64, output: f64) -> Self {
        // 1e9 nano-dollars per dollar / 1e6 tokens
        Self::new((input * 1_000.0).round() as i64, (output * 1_000.0).round() as i64)
    }
}

/// Cost of one request in nano-dollars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: i64,
    pub output_cost: i64,
    pub total_cost: i64,
}

/// Calculate costs: tokens * cost_per_token, saturating at `i64::MAX`
pub fn calculate_cost(usage: &UsageRecord, pricing: &ModelPricing) -> CostBreakdown {
    let input_cost = i64::from(usage.prompt_tokens.max(0))
        .saturating_mul(pricing.input_cost_per_token);
    let output_cost = i64::from(usage.completion_tokens.max(0))
        .saturating_mul(pricing.output_cost_per_token);

    CostBreakdown {
        input_cost,
        output_cost,
        total_cost: input_cost.saturating_add(output_cost),
    }
}

/// Passes chunks through untouched and reports the last usage seen
///
/// The record is sent when the inner stream ends. A stream dropped before
/// its end, or one that ended in an error, reports nothing.
pub struct UsageCollector<S>
where
    S: Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Unpin,
{
    inner: S,
    provider: String,
    provider_model: String,
    alias: String,
    last: Option<UsageRecord>,
    failed: bool,
    sender: Option<oneshot::Sender<Option<UsageRecord>>>,
}

impl<S> UsageCollector<S>
where
    S: Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Unpin,
{
    pub fn new(
        inner: S,
        provider: impl Into<String>,
        provider_model: impl Into<String>,
        alias: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Option<UsageRecord>>) {
        let (sender, receiver) = oneshot::channel();
        let collector = Self {
            inner,
            provider: provider.into(),
            provider_model: provider_model.into(),
            alias: alias.into(),
            last: None,
            failed: false,
            sender: Some(sender),
        };
        (collector, receiver)
    }

    fn finish(&mut self) {
        if let Some(sender) = self.sender.take() {
            let record = if self.failed { None } else { self.last.take() };
            if let Some(record) = &record {
                tracing::debug!(
                    provider = %record.provider,
                    model = %record.model,
                    prompt_tokens = record.prompt_tokens,
                    completion_tokens = record.completion_tokens,
                    "Stream usage captured"
                );
            }
            // Receiver may be gone; the usage is simply unreported then
            let _ = sender.send(record);
        }
    }
}

impl<S> Stream for UsageCollector<S>
where
    S: Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Unpin,
{
    type Item = Result<ChatCompletionChunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(usage) = &chunk.usage {
                    let record = UsageRecord::new(
                        &self.provider,
                        &self.provider_model,
                        &self.alias,
                        usage,
                    );
                    self.last = Some(record);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.failed = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
