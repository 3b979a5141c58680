//! Error classifier
//!
//! Pure functions that turn HTTP statuses, upstream error bodies and transport
//! failures into [`ProviderError`]s. Body inspection is best-effort: malformed
//! or empty bodies always degrade to a generic message, never to a panic.

use crate::errors::ProviderError;
use serde_json::Value;

/// Longest slice of an upstream body embedded into an error message
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Who was being called when the failure happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub provider: String,
    pub model: String,
}

impl ErrorContext {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Classify a non-2xx HTTP response
pub fn classify_status(status: u16, body: &str, ctx: &ErrorContext) -> ProviderError {
    let detail = extract_error_message(body);

    let error = match status {
        401 | 403 => {
            let message = match credential_hint(body) {
                Some(hint) => format!(
                    "provider '{}' rejected the credentials (HTTP {status}): {hint}",
                    ctx.provider
                ),
                None => format!(
                    "provider '{}' rejected the credentials (HTTP {status}), \
                     check API key: {detail}",
                    ctx.provider
                ),
            };
            ProviderError::configuration(message)
        }
        404 => ProviderError::model_unavailable(
            &ctx.model,
            &ctx.provider,
            format!("HTTP 404: {detail}"),
        ),
        429 => ProviderError::communication(format!(
            "provider '{}' rate limited the request (HTTP 429), retry later: {detail}",
            ctx.provider
        ))
        .with_rate_limited(),
        400 | 413 | 422 => ProviderError::validation(format!(
            "provider '{}' rejected the request (HTTP {status}): {detail}",
            ctx.provider
        )),
        _ => ProviderError::communication(format!(
            "provider '{}' returned HTTP {status}: {detail}",
            ctx.provider
        )),
    };

    error
        .with_status(status)
        .with_context(&ctx.provider, &ctx.model)
}

/// Classify a failure to send a request or receive its headers
pub fn classify_transport(err: reqwest::Error, ctx: &ErrorContext) -> ProviderError {
    let message = if err.is_timeout() {
        format!("request to provider '{}' timed out", ctx.provider)
    } else if err.is_connect() {
        format!("failed to connect to provider '{}'", ctx.provider)
    } else if err.is_builder() {
        return ProviderError::configuration(format!(
            "invalid request for provider '{}': {err}",
            ctx.provider
        ))
        .with_context(&ctx.provider, &ctx.model)
        .with_source(err);
    } else {
        format!("request to provider '{}' failed: {err}", ctx.provider)
    };

    ProviderError::communication(message)
        .with_context(&ctx.provider, &ctx.model)
        .with_source(err)
}

/// Classify an error raised while reading a streamed body
pub fn classify_stream_error<E>(err: E, ctx: &ErrorContext) -> ProviderError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let dyn_err: &(dyn std::error::Error + 'static) = &err;
    let timed_out = match dyn_err.downcast_ref::<reqwest::Error>() {
        Some(reqwest_err) => reqwest_err.is_timeout(),
        None => dyn_err
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut),
    };

    let message = if timed_out {
        format!("stream from provider '{}' timed out", ctx.provider)
    } else {
        format!("stream from provider '{}' was interrupted: {err}", ctx.provider)
    };

    ProviderError::communication(message)
        .with_context(&ctx.provider, &ctx.model)
        .with_source(err)
}

/// Detect an error object inside a 2xx body
///
/// Some providers answer quota problems with HTTP 200 and
/// `{"error": {"message": null, ...}}`.
pub fn detect_embedded_error(body: &[u8], ctx: &ErrorContext) -> Option<ProviderError> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.as_object()?.get("error")?;
    if error.is_null() {
        return None;
    }

    let message = match error {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    let lowered = String::from_utf8_lossy(body).to_lowercase();
    let mentions_quota = lowered.contains("quota") || lowered.contains("insufficient_balance");

    let error = match (message, mentions_quota) {
        (Some(msg), true) => ProviderError::communication(format!(
            "provider '{}' reported a quota problem: {msg}",
            ctx.provider
        ))
        .with_rate_limited(),
        (None, true) => ProviderError::communication(format!(
            "provider '{}' reported an exhausted quota without a message",
            ctx.provider
        ))
        .with_rate_limited(),
        (Some(msg), false) => ProviderError::communication(format!(
            "provider '{}' returned an error in a successful response: {msg}",
            ctx.provider
        )),
        (None, false) => ProviderError::communication(format!(
            "provider '{}' returned an error object without a message",
            ctx.provider
        )),
    };

    Some(error.with_context(&ctx.provider, &ctx.model))
}

/// Pull a human-readable message out of an upstream error body
pub fn extract_error_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty error body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let candidates = [
            value.pointer("/error/message"),
            value.pointer("/error"),
            value.pointer("/message"),
            value.pointer("/detail"),
            value.pointer("/error_description"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(text) = candidate.as_str() {
                if !text.is_empty() {
                    return truncate(text, MAX_ERROR_BODY_CHARS);
                }
            }
        }
    }

    truncate(trimmed, MAX_ERROR_BODY_CHARS)
}

/// Truncate on a char boundary, marking the cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Recognise 401/403 bodies that point at the wrong credential scheme
/// rather than a bad key
fn credential_hint(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    if lowered.contains("x-api-key") {
        Some("the provider expects the key in the 'x-api-key' header, not as a bearer token")
    } else if lowered.contains("subscription key") || lowered.contains("wrong api endpoint") {
        Some(
            "the key does not match this resource endpoint; \
             check the 'api-key' header and the resource name",
        )
    } else if lowered.contains("authentication scheme") || lowered.contains("bearer token") {
        Some("the provider expects 'Authorization: Bearer <key>'")
    } else if lowered.contains("region") && lowered.contains("not") && lowered.contains("support") {
        Some("the credentials are not valid for the configured region")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn ctx() -> ErrorContext {
        ErrorContext::new("openai", "gpt-4-0613")
    }

    // ==================== Status Classification ====================

    #[test]
    fn test_unauthorized_is_configuration() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
        let err = classify_status(401, body, &ctx());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.status_code(), Some(401));
        assert!(err.message().contains("check API key"));
        assert!(err.message().contains("Incorrect API key provided"));
    }

    #[test]
    fn test_forbidden_is_configuration() {
        let err = classify_status(403, "forbidden", &ctx());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_credential_scheme_mismatch_gets_specific_message() {
        let body = r#"{"type":"error","error":{
            "type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = classify_status(401, body, &ErrorContext::new("anthropic", "claude-3-opus"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("'x-api-key' header"));

        let body = r#"{"error":{"code":"401",
            "message":"Access denied due to invalid subscription key or wrong API endpoint."}}"#;
        let err = classify_status(401, body, &ErrorContext::new("azure", "gpt-4o"));
        assert!(err.message().contains("resource endpoint"));
    }

    #[test]
    fn test_not_found_is_model_unavailable_with_names() {
        let err = classify_status(
            404,
            r#"{"type":"error","error":{
                "type":"not_found_error","message":"model: claude-3-opus"}}"#,
            &ErrorContext::new("anthropic", "claude-3-opus"),
        );
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert!(err.to_string().contains("claude-3-opus"));
        assert!(err.to_string().contains("anthropic"));
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_too_many_requests_is_rate_limited_communication() {
        let err = classify_status(429, r#"{"error":{"message":"Rate limit reached"}}"#, &ctx());
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.is_rate_limited());
        assert!(err.message().contains("retry later"));
        assert!(err.is_fallback_eligible());
    }

    #[test]
    fn test_bad_request_is_validation() {
        let body = r#"{"error":{"message":"messages must not be empty"}}"#;
        let err = classify_status(400, body, &ctx());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_fallback_eligible());
    }

    #[test]
    fn test_server_error_is_communication() {
        let err = classify_status(503, "", &ctx());
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(!err.is_rate_limited());
        assert!(err.message().contains("503"));
        assert!(err.message().contains("empty error body"));
    }

    // ==================== Body Extraction ====================

    #[test]
    fn test_extract_error_message_variants() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad things"}}"#),
            "bad things"
        );
        assert_eq!(extract_error_message(r#"{"error":"plain"}"#), "plain");
        assert_eq!(extract_error_message(r#"{"message":"top level"}"#), "top level");
        assert_eq!(extract_error_message(r#"{"detail":"fastapi style"}"#), "fastapi style");
        assert_eq!(extract_error_message("<html>bad gateway</html>"), "<html>bad gateway</html>");
        assert_eq!(extract_error_message("   "), "empty error body");
    }

    #[test]
    fn test_extract_error_message_truncates_long_bodies() {
        let body = "é".repeat(MAX_ERROR_BODY_CHARS * 2);
        let message = extract_error_message(&body);
        assert_eq!(message.chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert!(message.ends_with('…'));
    }

    #[test]
    fn test_malformed_bodies_never_panic() {
        for body in ["{", "null", "[1,2", "\u{0}", r#"{"error":{"message":42}}"#] {
            let _ = classify_status(401, body, &ctx());
            let _ = detect_embedded_error(body.as_bytes(), &ctx());
        }
    }

    // ==================== Embedded Errors ====================

    #[test]
    fn test_embedded_null_message_quota_error() {
        let body = br#"{"error":{"message":null,"type":"insufficient_quota"}}"#;
        let err = detect_embedded_error(body, &ctx()).expect("should detect embedded error");
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.is_rate_limited());
        assert!(err.message().contains("quota"));
    }

    #[test]
    fn test_embedded_error_with_message() {
        let body = br#"{"error":{"message":"model overloaded"}}"#;
        let err = detect_embedded_error(body, &ctx()).unwrap();
        assert!(err.message().contains("model overloaded"));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_no_embedded_error_for_regular_bodies() {
        assert!(detect_embedded_error(br#"{"id":"x","choices":[]}"#, &ctx()).is_none());
        assert!(detect_embedded_error(br#"{"error":null,"id":"x"}"#, &ctx()).is_none());
        assert!(detect_embedded_error(b"not json", &ctx()).is_none());
    }

    // ==================== Stream Errors ====================

    #[test]
    fn test_stream_timeout_is_communication() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err = classify_stream_error(io, &ctx());
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.message().contains("timed out"));
    }

    #[test]
    fn test_stream_interruption_is_communication() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify_stream_error(io, &ctx());
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.message().contains("interrupted"));
        assert_eq!(err.provider(), Some("openai"));
    }
}
