//! Error taxonomy shared by every adapter and the router
//!
//! Failures are classified once, at the boundary where they are first observed
//! (HTTP status, transport error, malformed body), into a [`ProviderError`].
//! Callers branch on [`ProviderError::kind`] rather than on concrete error types.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Closed set of failure categories surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or upstream transport failure, including rate limiting
    Communication,
    /// Bad or missing credentials, unknown provider, broken setup
    Configuration,
    /// Malformed caller request
    Validation,
    /// The resolved provider does not serve the requested model or operation
    ModelUnavailable,
    /// Caller-initiated cancellation
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Communication => "communication",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::ModelUnavailable => "model unavailable",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Classified failure of an adapter or router operation
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}{}", attempted_suffix(.attempted))]
pub struct ProviderError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    provider: Option<String>,
    model: Option<String>,
    rate_limited: bool,
    attempted: Vec<String>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

fn attempted_suffix(attempted: &[String]) -> String {
    if attempted.is_empty() {
        String::new()
    } else {
        format!(" (attempted: {})", attempted.join(", "))
    }
}

impl ProviderError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            provider: None,
            model: None,
            rate_limited: false,
            attempted: Vec::new(),
            source: None,
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Communication, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Model (or operation) not served by `provider`. The message always names both.
    pub fn model_unavailable(
        model: impl Into<String>,
        provider: impl Into<String>,
        detail: impl AsRef<str>,
    ) -> Self {
        let model = model.into();
        let provider = provider.into();
        let detail = detail.as_ref();
        let message = if detail.is_empty() {
            format!("model '{model}' is not available from provider '{provider}'")
        } else {
            format!("model '{model}' is not available from provider '{provider}': {detail}")
        };
        let mut error = Self::new(ErrorKind::ModelUnavailable, message);
        error.provider = Some(provider);
        error.model = Some(model);
        error
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request was cancelled by the caller")
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Fill in provider/model when the classifying layer did not know them
    pub fn with_context(mut self, provider: &str, model: &str) -> Self {
        if self.provider.is_none() {
            self.provider = Some(provider.to_string());
        }
        if self.model.is_none() {
            self.model = Some(model.to_string());
        }
        self
    }

    /// Annotate with the candidates the router walked before giving up
    pub fn with_attempted(mut self, attempted: Vec<String>) -> Self {
        self.attempted = attempted;
        self
    }

    /// Rewrite the message, keeping every other field
    pub fn map_message(mut self, f: impl FnOnce(&str) -> String) -> Self {
        self.message = f(&self.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Only transport failures and unavailable models are worth trying elsewhere
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Communication | ErrorKind::ModelUnavailable
        )
    }
}
