//! HTTP gateway the orchestrator uses to call remote services.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::RetryPolicy;
use serde_json::Value;
use thiserror::Error;

/// Longest error body kept when a remote call fails.
const MAX_ERROR_BODY_LEN: usize = 500;

/// HTTP verbs the saga steps use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uniform classification of remote call failures.
///
/// The orchestrator treats every variant as a step failure; the split exists
/// for logging and for callers that retry idempotent reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request exceeded the gateway's fixed timeout.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The service answered with a non-2xx status.
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },

    /// The request never produced an HTTP response.
    #[error("Transport error calling {url}: {cause}")]
    Transport { url: String, cause: String },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Configuration(String),
}

/// Thin client abstraction over the remote services a saga touches.
///
/// Implementations enforce their own timeout and never retry on their own;
/// write idempotency is the caller's problem.
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Performs one HTTP call and parses the response as JSON.
    ///
    /// An empty 2xx body maps to `Value::Null`.
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError>;
}

/// Extension trait providing convenience methods for gateways.
#[async_trait]
pub trait ServiceGatewayExt: ServiceGateway {
    /// GET with retries under the shared backoff policy.
    ///
    /// Only for idempotent reads (health probes, lookups); writes go through
    /// `call` exactly once.
    async fn get_with_retry(
        &self,
        url: &str,
        policy: &RetryPolicy,
    ) -> Result<Value, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.call(HttpMethod::Get, url, None).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if policy.is_exhausted(attempt) {
                        return Err(e);
                    }
                    tracing::debug!(url, attempt, error = %e, "retrying gateway read");
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }
}

// Blanket implementation for all ServiceGateway implementations
impl<T: ServiceGateway + ?Sized> ServiceGatewayExt for T {}

/// reqwest-backed gateway with a fixed per-request timeout.
#[derive(Clone)]
pub struct HttpServiceGateway {
    client: reqwest::Client,
}

impl HttpServiceGateway {
    /// Creates a gateway whose every request times out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Ok(Self { client })
    }

    fn classify(url: &str, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout {
                url: url.to_string(),
            }
        } else {
            GatewayError::Transport {
                url: url.to_string(),
                cause: error.to_string(),
            }
        }
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LEN {
        body.chars().take(MAX_ERROR_BODY_LEN).collect()
    } else {
        body
    }
}

#[async_trait]
impl ServiceGateway for HttpServiceGateway {
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate_body(body),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Self::classify(url, e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Transport {
            url: url.to_string(),
            cause: format!("invalid JSON response: {e}"),
        })
    }
}

/// One call as recorded by the in-memory gateway.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct InMemoryGatewayState {
    responses: Vec<(String, Value)>,
    failures: Vec<(String, GatewayError)>,
    transient_failures: Vec<(String, u32)>,
    calls: Vec<RecordedCall>,
}

/// In-memory gateway implementation for testing.
///
/// Responses and failures are scripted per URL fragment; the longest
/// matching fragment wins. Unscripted calls succeed with an empty object.
#[derive(Clone, Default)]
pub struct InMemoryServiceGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryServiceGateway {
    /// Creates a new gateway with no scripted behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the response for calls whose URL contains `fragment`.
    pub fn respond_with(&self, fragment: impl Into<String>, response: Value) {
        self.state
            .write()
            .unwrap()
            .responses
            .push((fragment.into(), response));
    }

    /// Scripts a permanent failure for calls whose URL contains `fragment`.
    pub fn fail_with(&self, fragment: impl Into<String>, error: GatewayError) {
        self.state
            .write()
            .unwrap()
            .failures
            .push((fragment.into(), error));
    }

    /// Fails the next `times` calls whose URL contains `fragment`, then
    /// falls through to the scripted response.
    pub fn fail_times(&self, fragment: impl Into<String>, times: u32) {
        self.state
            .write()
            .unwrap()
            .transient_failures
            .push((fragment.into(), times));
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().unwrap().calls.clone()
    }

    /// Number of calls whose URL contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.url.contains(fragment))
            .count()
    }
}

fn longest_match<'a, T>(entries: &'a [(String, T)], url: &str) -> Option<&'a T> {
    entries
        .iter()
        .filter(|(fragment, _)| url.contains(fragment.as_str()))
        .max_by_key(|(fragment, _)| fragment.len())
        .map(|(_, value)| value)
}

#[async_trait]
impl ServiceGateway for InMemoryServiceGateway {
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        state.calls.push(RecordedCall {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        let mut tripped: Option<String> = None;
        if let Some((fragment, remaining)) = state
            .transient_failures
            .iter_mut()
            .filter(|(fragment, remaining)| url.contains(fragment.as_str()) && *remaining > 0)
            .max_by_key(|(fragment, _)| fragment.len())
        {
            *remaining -= 1;
            tripped = Some(fragment.clone());
        }
        if let Some(fragment) = tripped {
            return Err(longest_match(&state.failures, url).cloned().unwrap_or(
                GatewayError::Transport {
                    url: url.to_string(),
                    cause: format!("transient failure (scripted for {fragment})"),
                },
            ));
        }

        if let Some(error) = longest_match(&state.failures, url) {
            return Err(error.clone());
        }

        Ok(longest_match(&state.responses, url)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }
}
