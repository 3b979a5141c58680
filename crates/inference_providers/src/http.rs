//! HTTP exchange helper shared by every backend
//!
//! All upstream traffic goes through [`HttpExchange`]: requests race the
//! caller's [`CancellationToken`], non-2xx responses are classified into
//! [`ProviderError`]s, and nothing here ever logs header values.

use crate::classifier::{classify_status, classify_transport, detect_embedded_error, ErrorContext};
use crate::errors::ProviderError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Settings for the pooled client shared by all adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    /// Default request timeout when neither the mapping nor the provider sets one
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle() -> usize {
    32
}

fn default_request_timeout() -> u64 {
    120
}

fn default_user_agent() -> String {
    concat!("llm-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Build the single pooled client; callers clone it freely
pub fn build_client(settings: &HttpClientSettings) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
        .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_seconds))
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .user_agent(settings.user_agent.clone())
        .build()
        .map_err(|e| {
            ProviderError::configuration(format!("failed to build HTTP client: {e}")).with_source(e)
        })
}

/// Turn `(name, value)` pairs into a header map
///
/// Invalid names or values (e.g. an API key with a stray newline) are a
/// configuration problem, not a transport one.
pub fn build_headers<'a, I>(pairs: I) -> Result<HeaderMap, ProviderError>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ProviderError::configuration(format!("invalid header name '{name}'"))
        })?;
        let mut header_value = HeaderValue::from_str(&value).map_err(|_| {
            ProviderError::configuration(format!("invalid value for header '{name}'"))
        })?;
        if is_sensitive(name) {
            header_value.set_sensitive(true);
        }
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn is_sensitive(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered == "authorization" || lowered.contains("key") || lowered.contains("token")
}

/// One adapter's view of the shared client
#[derive(Debug, Clone)]
pub struct HttpExchange {
    client: Client,
    context: ErrorContext,
    timeout: Duration,
}

impl HttpExchange {
    pub fn new(client: Client, context: ErrorContext, timeout: Duration) -> Self {
        Self {
            client,
            context,
            timeout,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Send a JSON request and return the complete 2xx body
    pub async fn send_json<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProviderError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.execute(request, &method, url, cancel, false).await?;
        self.read_body(response, cancel).await
    }

    /// GET with no body
    pub async fn get_json(
        &self,
        url: &str,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProviderError> {
        self.send_json::<()>(Method::GET, url, None, headers, cancel)
            .await
    }

    /// Send a JSON request whose 2xx body is an SSE stream
    ///
    /// Only the handshake is bounded by the timeout; the body may stream for
    /// as long as the upstream keeps sending.
    pub async fn send_streaming<B>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response, ProviderError>
    where
        B: Serialize + ?Sized,
    {
        let request = self
            .client
            .post(url)
            .headers(headers)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body);

        self.execute(request, &Method::POST, url, cancel, true).await
    }

    /// Send a multipart form (image edits and variations)
    pub async fn send_multipart(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProviderError> {
        let request = self
            .client
            .post(url)
            .headers(headers)
            .timeout(self.timeout)
            .multipart(form);

        let response = self.execute(request, &Method::POST, url, cancel, false).await?;
        self.read_body(response, cancel).await
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        method: &Method,
        url: &str,
        cancel: &CancellationToken,
        bound_handshake: bool,
    ) -> Result<Response, ProviderError> {
        let started = Instant::now();
        let log_url = strip_query(url);

        let send = async {
            if bound_handshake {
                match tokio::time::timeout(self.timeout, request.send()).await {
                    Ok(result) => result.map_err(|e| classify_transport(e, &self.context)),
                    Err(_) => Err(ProviderError::communication(format!(
                        "request to provider '{}' timed out after {}s",
                        self.context.provider,
                        self.timeout.as_secs()
                    ))
                    .with_context(&self.context.provider, &self.context.model)),
                }
            } else {
                request
                    .send()
                    .await
                    .map_err(|e| classify_transport(e, &self.context))
            }
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    provider = %self.context.provider,
                    %method,
                    url = %log_url,
                    "Request cancelled before upstream responded"
                );
                return Err(ProviderError::cancelled());
            }
            result = send => result?,
        };

        let status = response.status();
        debug!(
            provider = %self.context.provider,
            model = %self.context.model,
            %method,
            url = %log_url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        if status.is_success() {
            return Ok(response);
        }

        // Best effort: an unreadable body still yields a classified error
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            body = response.text() => body.unwrap_or_default(),
        };
        Err(classify_status(status.as_u16(), &body, &self.context))
    }

    async fn read_body(
        &self,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProviderError> {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            body = response.bytes() => body.map_err(|e| classify_transport(e, &self.context))?,
        };

        if let Some(error) = detect_embedded_error(&body, &self.context) {
            return Err(error);
        }
        Ok(body)
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use httpmock::MockServer;
    use serde_json::json;

    fn exchange(timeout: Duration) -> HttpExchange {
        let client = build_client(&HttpClientSettings::default()).unwrap();
        HttpExchange::new(client, ErrorContext::new("openai", "gpt-4o"), timeout)
    }

    // ==================== Headers ====================

    #[test]
    fn test_build_headers_marks_secrets_sensitive() {
        let headers = build_headers([
            ("Authorization", "Bearer sk-test".to_string()),
            ("anthropic-version", "2023-06-01".to_string()),
        ])
        .unwrap();

        assert!(headers.get("authorization").unwrap().is_sensitive());
        assert!(!headers.get("anthropic-version").unwrap().is_sensitive());
    }

    #[test]
    fn test_build_headers_rejects_invalid_values() {
        let err = build_headers([("x-api-key", "sk\nbad".to_string())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.message().contains("bad"));
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(
            strip_query(
                "https://x.openai.azure.com/openai/deployments/d/chat/completions\
                 ?api-version=2024-06-01"
            ),
            "https://x.openai.azure.com/openai/deployments/d/chat/completions"
        );
        assert_eq!(strip_query("http://localhost/v1/models"), "http://localhost/v1/models");
    }

    // ==================== Exchange ====================

    #[tokio::test]
    async fn test_send_json_returns_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model":"gpt-4o"}"#);
                then.status(200).json_body(json!({"id": "chatcmpl-1"}));
            })
            .await;

        let headers = build_headers([("Authorization", "Bearer sk-test".to_string())]).unwrap();
        let body = exchange(Duration::from_secs(5))
            .send_json(
                Method::POST,
                &server.url("/v1/chat/completions"),
                Some(&json!({"model": "gpt-4o"})),
                headers,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["id"], "chatcmpl-1");
    }

    #[tokio::test]
    async fn test_non_success_status_is_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/v1/models");
                then.status(404)
                    .json_body(json!({"error": {"message": "The model does not exist"}}));
            })
            .await;

        let err = exchange(Duration::from_secs(5))
            .get_json(
                &server.url("/v1/models"),
                HeaderMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert_eq!(err.status_code(), Some(404));
        assert!(err.message().contains("The model does not exist"));
    }

    #[tokio::test]
    async fn test_embedded_error_in_success_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/v1/models");
                then.status(200)
                    .json_body(json!({"error": {"message": null, "code": "quota_exceeded"}}));
            })
            .await;

        let err = exchange(Duration::from_secs(5))
            .get_json(
                &server.url("/v1/models"),
                HeaderMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_slow_upstream() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/slow");
                then.status(200)
                    .json_body(json!({}))
                    .delay(Duration::from_secs(5));
            })
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = exchange(Duration::from_secs(30))
            .get_json(&server.url("/slow"), HeaderMap::new(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_is_communication() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/slow");
                then.status(200)
                    .json_body(json!({}))
                    .delay(Duration::from_secs(3));
            })
            .await;

        let err = exchange(Duration::from_millis(100))
            .get_json(
                &server.url("/slow"),
                HeaderMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_streaming_handshake_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/stream");
                then.status(200).body("data: [DONE]\n\n").delay(Duration::from_secs(3));
            })
            .await;

        let err = exchange(Duration::from_millis(100))
            .send_streaming(
                &server.url("/stream"),
                &json!({"stream": true}),
                HeaderMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.message().contains("timed out"));
    }
}
