use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use patrol_core::{ErrorClass, LlmConfig, PatrolError, ProviderError, ProviderKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::retry::RetryPolicy;

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use patrol_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Review this code");
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// A system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use patrol_review::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// Something that can answer a chat completion request.
///
/// Implementations make exactly one attempt; timeouts and retries belong to
/// [`LlmGateway`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation and return the assistant's text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;

    /// Model identifier, shown in review footers.
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes a `/chat/completions` endpoint under
/// its base URL: OpenRouter (the default), OpenAI, Ollama, vLLM, LiteLLM.
///
/// # Examples
///
/// ```
/// use patrol_core::LlmConfig;
/// use patrol_review::llm::{ChatBackend, LlmClient};
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "google/gemini-2.0-flash-001");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, PatrolError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("byte-patrol/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PatrolError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    /// Builds a request to `{base_url}/chat/completions` with the given
    /// messages, temperature 0.1, and the configured `max_tokens`.
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.1,
            "max_tokens": self.config.max_tokens,
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(llm_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body_text = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_status(ProviderKind::Llm, status.as_u16(), &body_text)
                    .with_retry_after(retry_after),
            );
        }

        let response_body: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderKind::Llm,
                ErrorClass::InvalidResponse,
                format!("failed to parse response: {e}"),
            )
        })?;

        let content = extract_content(&response_body)?;
        debug!(chars = content.len(), "received completion");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

fn llm_transport_error(e: reqwest::Error) -> ProviderError {
    let class = if e.is_timeout() {
        ErrorClass::Timeout
    } else {
        ErrorClass::Network
    };
    ProviderError::new(ProviderKind::Llm, class, format!("request failed: {e}"))
}

/// Seconds form of `Retry-After`; the HTTP-date form is ignored.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull the assistant text out of a chat-completions body.
///
/// Some gateways report upstream failures inside a `200` body as
/// `{"error": {"code": 429, "message": "..."}}`; those are classified like
/// the equivalent HTTP status.
fn extract_content(body: &serde_json::Value) -> Result<String, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown provider error");
        let code = error
            .get("code")
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok());
        return Err(match code {
            Some(code) => ProviderError::from_status(ProviderKind::Llm, code, message),
            None => ProviderError::new(ProviderKind::Llm, ErrorClass::InvalidResponse, message),
        });
    }

    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            ProviderError::new(
                ProviderKind::Llm,
                ErrorClass::InvalidResponse,
                format!("unexpected response structure: {body}"),
            )
        })?;

    if content.trim().is_empty() {
        return Err(ProviderError::new(
            ProviderKind::Llm,
            ErrorClass::InvalidResponse,
            "model returned an empty completion",
        ));
    }
    Ok(content.to_string())
}

/// Timeout and retry policy around a [`ChatBackend`].
///
/// Each attempt runs under its own timeout. Transient failures are retried
/// with bounded exponential backoff; permanent ones return at once. A call
/// yields at most one completion.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use patrol_core::LlmConfig;
/// use patrol_review::llm::{LlmClient, LlmGateway};
///
/// let config = LlmConfig::default();
/// let gateway = LlmGateway::from_config(Arc::new(LlmClient::new(&config).unwrap()), &config);
/// assert_eq!(gateway.model(), config.model);
/// ```
#[derive(Clone)]
pub struct LlmGateway {
    backend: Arc<dyn ChatBackend>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl LlmGateway {
    /// Wrap a backend with an explicit timeout and retry policy.
    pub fn new(backend: Arc<dyn ChatBackend>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            backend,
            timeout,
            retry,
        }
    }

    /// Wrap a backend using the `[llm]` configuration section.
    pub fn from_config(backend: Arc<dyn ChatBackend>, config: &LlmConfig) -> Self {
        Self::new(
            backend,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::from_config(config),
        )
    }

    /// Model identifier of the wrapped backend.
    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Request a completion, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the [`ProviderError`] of a permanent failure, or of the last
    /// attempt once retries are exhausted.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let backend = &self.backend;
        let timeout = self.timeout;
        self.retry
            .run("llm completion", move || async move {
                match tokio::time::timeout(timeout, backend.complete(messages)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::new(
                        ProviderKind::Llm,
                        ErrorClass::Timeout,
                        format!("no response within {}s", timeout.as_secs_f32()),
                    )),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a script of results, one per call.
    struct Scripted {
        script: Mutex<Vec<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
        delay: Duration,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<String, ProviderError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("unscripted".into()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn err(status: u16) -> ProviderError {
        ProviderError::from_status(ProviderKind::Llm, status, "")
    }

    #[test]
    fn client_construction_succeeds() {
        let config = LlmConfig::default();
        assert!(LlmClient::new(&config).is_ok());
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..LlmConfig::default()
        };
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage::system("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn content_extraction() {
        let ok = serde_json::json!({"choices": [{"message": {"content": "{\"rating\": 7}"}}]});
        assert_eq!(extract_content(&ok).unwrap(), "{\"rating\": 7}");

        let empty = serde_json::json!({"choices": [{"message": {"content": "  "}}]});
        assert_eq!(
            extract_content(&empty).unwrap_err().class,
            ErrorClass::InvalidResponse
        );

        let shape = serde_json::json!({"data": []});
        assert_eq!(
            extract_content(&shape).unwrap_err().class,
            ErrorClass::InvalidResponse
        );

        let embedded = serde_json::json!({"error": {"code": 502, "message": "upstream down"}});
        let e = extract_content(&embedded).unwrap_err();
        assert_eq!(e.class, ErrorClass::Server(502));
        assert!(e.is_transient());
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn gateway_retries_transient_then_returns_one_result() {
        let backend = Arc::new(Scripted::new(vec![
            Err(err(503)),
            Err(err(429)),
            Ok("review".into()),
        ]));
        let gateway = LlmGateway::new(backend.clone(), Duration::from_secs(5), fast_retry());
        let out = gateway.complete(&[ChatMessage::user("x")]).await.unwrap();
        assert_eq!(out, "review");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn gateway_fails_fast_on_permanent_errors() {
        for status in [401, 402, 403, 404] {
            let backend = Arc::new(Scripted::new(vec![Err(err(status)), Ok("late".into())]));
            let gateway = LlmGateway::new(backend.clone(), Duration::from_secs(5), fast_retry());
            let e = gateway.complete(&[]).await.unwrap_err();
            assert!(!e.is_transient(), "status {status}");
            assert_eq!(backend.calls(), 1, "status {status}");
        }
    }

    #[tokio::test]
    async fn gateway_gives_up_after_max_retries() {
        let backend = Arc::new(Scripted::new(vec![
            Err(err(500)),
            Err(err(500)),
            Err(err(500)),
            Ok("too late".into()),
        ]));
        let gateway = LlmGateway::new(backend.clone(), Duration::from_secs(5), fast_retry());
        let e = gateway.complete(&[]).await.unwrap_err();
        assert_eq!(e.class, ErrorClass::Server(500));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let mut slow = Scripted::new(vec![]);
        slow.delay = Duration::from_millis(200);
        let backend = Arc::new(slow);
        let gateway = LlmGateway::new(
            backend.clone(),
            Duration::from_millis(10),
            RetryPolicy {
                max_retries: 1,
                ..fast_retry()
            },
        );
        let e = gateway.complete(&[]).await.unwrap_err();
        assert_eq!(e.class, ErrorClass::Timeout);
        assert_eq!(backend.calls(), 2);
    }
}
