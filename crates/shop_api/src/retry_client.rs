use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::types::{ShopError, TransportError};

/// Client-side status codes that signal a transient condition
const RETRYABLE_CLIENT_STATUSES: [u16; 3] = [408, 425, 429];

/// Longest response body kept in a `ShopError::Client`
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Description of one outbound request
///
/// The timeout is mandatory: there is no way to build a request that may wait
/// forever.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// Request headers, in order
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<Value>,
    /// Upper bound for the whole exchange
    pub timeout: Duration,
}

impl ApiRequest {
    /// Create a request with no query, headers or body
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Shorthand for a GET request
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::GET, url, timeout)
    }

    /// Shorthand for a PUT request
    pub fn put(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::PUT, url, timeout)
    }

    /// Append a query parameter
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Append a header
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Append several headers
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attach a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header with the given name, ignoring case
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response as seen by the API client
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers; repeated headers appear once per value
    pub headers: Vec<(String, String)>,
    /// Response body as text
    pub body: String,
}

impl ApiResponse {
    /// Create a response without headers
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// All values of a header, ignoring case
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A single-attempt HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request once, without retrying
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `HttpTransport` backed by reqwest
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(classify)?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,

    /// Delay before the first retry, doubled for each further one (default: 2 seconds)
    pub base_delay: Duration,

    /// Upper bound for the exponential part of the delay (default: 30 seconds)
    pub max_delay: Duration,

    /// Maximum random delay added on top (default: 2 seconds)
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (0-based), without jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered_delay(&self, retry: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };

        self.backoff_delay(retry) + jitter
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || RETRYABLE_CLIENT_STATUSES.contains(&status)
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Executes requests through a transport, retrying transient failures
#[derive(Clone)]
pub struct RetryClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryClient {
    /// Create a new retry client
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// The policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a request, retrying connection failures, timeouts, 5xx and
    /// rate-limit style statuses.
    ///
    /// Other non-2xx statuses surface immediately as `ShopError::Client`.
    /// `ShopError::Network` is returned only once every attempt has failed.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ShopError> {
        self.execute_with(|| request.clone()).await
    }

    /// Like [`RetryClient::execute`], but `build` is called once per attempt so
    /// time-dependent headers are fresh on every retry.
    pub async fn execute_with<F>(&self, build: F) -> Result<ApiResponse, ShopError>
    where
        F: Fn() -> ApiRequest + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = String::new();
        let mut target = String::new();

        for attempt in 1..=max_attempts {
            let request = build();
            target = format!("{} {}", request.method, request.url);

            let failure = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", target, attempt);
                    }
                    return Ok(response);
                }
                Ok(response) if is_retryable_status(response.status) => {
                    format!("HTTP {}", response.status)
                }
                Ok(response) => {
                    warn!(
                        "{} rejected with HTTP {}, not retrying",
                        target, response.status
                    );
                    return Err(ShopError::Client {
                        status: response.status,
                        body: truncate_body(&response.body),
                    });
                }
                Err(e) => e.to_string(),
            };

            if attempt < max_attempts {
                let delay = self.policy.jittered_delay(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                    target,
                    attempt,
                    max_attempts,
                    failure,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }

            last_failure = failure;
        }

        error!(
            "{} failed after {} attempt(s): {}",
            target, max_attempts, last_failure
        );

        Err(ShopError::Network {
            attempts: max_attempts,
            message: last_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;

    fn client_with(transport: Arc<ScriptedTransport>, max_attempts: u32) -> RetryClient {
        RetryClient::new(
            transport,
            RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        )
    }

    fn request() -> ApiRequest {
        ApiRequest::get("https://shop.example/api", Duration::from_secs(5))
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        };

        for _ in 0..100 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_until_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ApiResponse::new(503, "busy")),
            Err(TransportError::Timeout("slow".to_string())),
            Ok(ApiResponse::new(200, "ok")),
        ]));
        let client = client_with(transport.clone(), 3);

        let response = client.execute(&request()).await.unwrap();

        assert_eq!(response.body, "ok");
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ApiResponse::new(429, "slow down")),
            Ok(ApiResponse::new(200, "ok")),
        ]));
        let client = client_with(transport.clone(), 3);

        assert!(client.execute(&request()).await.is_ok());
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_definitive_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ApiResponse::new(404, "no such product")),
            Ok(ApiResponse::new(200, "ok")),
        ]));
        let client = client_with(transport.clone(), 3);

        match client.execute(&request()).await {
            Err(ShopError::Client { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such product");
            }
            other => panic!("expected client error, got {:?}", other),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_last_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".to_string())),
            Ok(ApiResponse::new(500, "")),
            Ok(ApiResponse::new(502, "")),
        ]));
        let client = client_with(transport.clone(), 3);

        match client.execute(&request()).await {
            Err(ShopError::Network { attempts, message }) => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "HTTP 502");
            }
            other => panic!("expected network error, got {:?}", other),
        }
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_is_rebuilt_for_every_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ApiResponse::new(503, "")),
            Ok(ApiResponse::new(200, "ok")),
        ]));
        let client = client_with(transport.clone(), 3);
        let built = std::sync::atomic::AtomicU32::new(0);

        let response = client
            .execute_with(|| {
                let attempt = built.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                request().header("x-attempt", attempt.to_string())
            })
            .await
            .unwrap();

        assert_eq!(response.body, "ok");
        let attempts: Vec<_> = transport
            .requests()
            .iter()
            .map(|request| request.header_value("x-attempt").map(str::to_string))
            .collect();
        assert_eq!(attempts, vec![Some("1".to_string()), Some("2".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_sends_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ApiResponse::new(200, "ok"))]));
        let client = client_with(transport.clone(), 0);

        assert!(client.execute(&request()).await.is_ok());
        assert_eq!(transport.request_count(), 1);
    }
}
