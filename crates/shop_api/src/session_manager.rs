use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::retry_client::{ApiRequest, ApiResponse, RetryClient};
use crate::types::ShopError;

/// Header carrying the per-request integrity value
pub const INTEGRITY_HEADER: &str = "tid";

/// Cookie used as the session token when the handshake body carries none
const SESSION_COOKIE: &str = "jsessionid";

// Regex for the JSON object inside `session = {...};`
static SESSION_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Settings for establishing a shop session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the shop (default: https://shop.amul.com)
    pub base_url: String,

    /// Delivery pincode used to select the regional store
    pub pincode: String,

    /// Timeout applied to every bootstrap request (default: 30 seconds)
    pub request_timeout: Duration,

    /// Salt mixed into the integrity header digest
    pub integrity_salt: String,

    /// User agents to rotate through, one picked per run
    pub user_agents: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://shop.amul.com".to_string(),
            pincode: String::new(),
            request_timeout: Duration::from_secs(30),
            integrity_salt: "amul-shop-tid".to_string(),
            user_agents: vec![
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string(),
            ],
        }
    }
}

/// Compute the integrity header value for one request.
///
/// Format: `{store}:{timestamp_ms}:{hex(sha256(salt:token:store:timestamp_ms))}`.
pub fn integrity_token(salt: &str, session_token: &str, store: &str, timestamp_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", salt, session_token, store, timestamp_ms).as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}:{}:{}", store, timestamp_ms, digest)
}

/// Credentials and region selection for one run.
///
/// Owned by the run that bootstrapped it and never persisted.
#[derive(Debug)]
pub struct SessionContext {
    base_url: String,
    user_agent: String,
    cookie_url: Url,
    cookies: Arc<Jar>,
    session_token: String,
    integrity_salt: String,
    pincode: String,
    store: String,
    established_at: DateTime<Utc>,
    last_timestamp_ms: AtomicI64,
}

impl SessionContext {
    pub(crate) fn new(
        base_url: &str,
        user_agent: &str,
        session_token: &str,
        integrity_salt: &str,
        pincode: &str,
    ) -> Result<Self, ShopError> {
        let base_url = base_url.trim_end_matches('/');
        let cookie_url = Url::parse(base_url)
            .map_err(|e| ShopError::Session(format!("invalid base URL {}: {}", base_url, e)))?;

        Ok(Self {
            base_url: base_url.to_string(),
            user_agent: user_agent.to_string(),
            cookie_url,
            cookies: Arc::new(Jar::default()),
            session_token: session_token.to_string(),
            integrity_salt: integrity_salt.to_string(),
            pincode: pincode.to_string(),
            store: String::new(),
            established_at: Utc::now(),
            last_timestamp_ms: AtomicI64::new(0),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_store(mut self, store: &str) -> Self {
        self.store = store.to_string();
        self
    }

    /// Base URL requests are made against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// User agent chosen for this run
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Pincode the region was selected for
    pub fn pincode(&self) -> &str {
        &self.pincode
    }

    /// Regional store selected during bootstrap
    pub fn store(&self) -> &str {
        &self.store
    }

    /// When the session was established
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Value of one live session cookie
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_header()?
            .split("; ")
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// `Cookie` header value, if any unexpired cookies apply to the shop
    pub fn cookie_header(&self) -> Option<String> {
        self.cookies
            .cookies(&self.cookie_url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Integrity header value for a request issued at `timestamp_ms`
    pub fn integrity_header(&self, timestamp_ms: i64) -> String {
        integrity_token(
            &self.integrity_salt,
            &self.session_token,
            &self.store,
            timestamp_ms,
        )
    }

    /// Timestamp for the next signed request, strictly increasing per session
    fn next_timestamp_ms(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = match self.last_timestamp_ms.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(now.max(last + 1)),
        ) {
            Ok(last) | Err(last) => last,
        };
        now.max(previous + 1)
    }

    /// Headers for a request sent now, with a freshly computed integrity value
    pub fn signed_headers(&self) -> Vec<(String, String)> {
        self.request_headers(self.next_timestamp_ms())
    }

    /// Headers for an API request issued at `timestamp_ms`
    pub fn request_headers(&self, timestamp_ms: i64) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            (
                "Accept".to_string(),
                "application/json, text/plain, */*".to_string(),
            ),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            ("Referer".to_string(), format!("{}/", self.base_url)),
            ("frontend".to_string(), "1".to_string()),
        ];

        if let Some(cookie) = self.cookie_header() {
            headers.push(("Cookie".to_string(), cookie));
        }

        if !self.store.is_empty() {
            headers.push((
                INTEGRITY_HEADER.to_string(),
                self.integrity_header(timestamp_ms),
            ));
        }

        headers
    }

    fn absorb_cookies(&self, response: &ApiResponse) {
        for set_cookie in response.header_values("set-cookie") {
            self.cookies.add_cookie_str(set_cookie, &self.cookie_url);
        }
    }
}

fn extract_session_token(body: &str) -> Option<String> {
    let object = SESSION_OBJECT.find(body)?;
    let session: Value = serde_json::from_str(object.as_str()).ok()?;

    session
        .get("tid")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Response from the pincode lookup
#[derive(Debug, Deserialize)]
struct PincodeResponse {
    #[serde(default)]
    records: Vec<PincodeRecord>,
}

#[derive(Debug, Deserialize)]
struct PincodeRecord {
    #[serde(default)]
    pincode: Option<Value>,
    #[serde(default)]
    substore: Option<String>,
}

/// Establishes a region-scoped session with the shop
pub struct SessionBootstrapper {
    client: RetryClient,
    config: SessionConfig,
}

impl SessionBootstrapper {
    /// Create a new session bootstrapper
    pub fn new(client: RetryClient, config: SessionConfig) -> Self {
        Self { client, config }
    }

    /// Run the handshake and region selection.
    ///
    /// Any failure, including exhausted retries, is reported as
    /// `ShopError::Session`.
    pub async fn bootstrap(&self) -> Result<SessionContext, ShopError> {
        info!(
            "Creating shop session for pincode {}",
            self.config.pincode
        );

        let user_agent = self.pick_user_agent();
        debug!("Using user agent: {}", user_agent);

        let mut context = self
            .handshake(&user_agent)
            .await
            .map_err(|e| session_error("handshake", e))?;

        let store = self
            .resolve_store(&context)
            .await
            .map_err(|e| session_error("pincode lookup", e))?;
        context.store = store;

        self.select_store(&context)
            .await
            .map_err(|e| session_error("store selection", e))?;

        info!(
            "Session established for store {} (pincode {})",
            context.store, context.pincode
        );
        Ok(context)
    }

    fn pick_user_agent(&self) -> String {
        let mut rng = rand::rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| SessionConfig::default().user_agents[0].clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Visit the storefront for baseline cookies, then read the session token
    async fn handshake(&self, user_agent: &str) -> Result<SessionContext, ShopError> {
        let home = ApiRequest::get(self.url("/"), self.config.request_timeout)
            .header("User-Agent", user_agent)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .header("DNT", "1")
            .header("Upgrade-Insecure-Requests", "1");
        let home_response = self.client.execute(&home).await?;

        let mut context = SessionContext::new(
            &self.config.base_url,
            user_agent,
            "",
            &self.config.integrity_salt,
            &self.config.pincode,
        )?;
        context.absorb_cookies(&home_response);

        let info_response = self
            .client
            .execute_with(|| {
                let issued_at = context.next_timestamp_ms();
                ApiRequest::get(self.url("/user/info.js"), self.config.request_timeout)
                    .query("_v", issued_at.to_string())
                    .headers(context.request_headers(issued_at))
            })
            .await?;
        context.absorb_cookies(&info_response);

        let token = extract_session_token(&info_response.body)
            .or_else(|| context.cookie(SESSION_COOKIE))
            .ok_or_else(|| ShopError::Session("no session token in handshake".to_string()))?;
        context.session_token = token;

        Ok(context)
    }

    /// Find the regional store serving the configured pincode
    async fn resolve_store(&self, context: &SessionContext) -> Result<String, ShopError> {
        let response = self
            .client
            .execute_with(|| {
                ApiRequest::get(self.url("/entity/pincode"), self.config.request_timeout)
                    .query("limit", "50")
                    .query("filters[0][field]", "pincode")
                    .query("filters[0][value]", self.config.pincode.as_str())
                    .query("filters[0][operator]", "regex")
                    .query("cf_cache", "1h")
                    .headers(context.signed_headers())
            })
            .await?;

        let lookup: PincodeResponse = serde_json::from_str(&response.body)
            .map_err(|e| ShopError::Session(format!("Failed to parse pincode response: {}", e)))?;

        let matches_pincode = |record: &PincodeRecord| match &record.pincode {
            Some(Value::String(code)) => code == &self.config.pincode,
            Some(Value::Number(code)) => code.to_string() == self.config.pincode,
            _ => false,
        };

        let record = lookup
            .records
            .iter()
            .find(|record| matches_pincode(record))
            .or_else(|| lookup.records.first());

        record
            .and_then(|record| record.substore.clone())
            .filter(|store| !store.is_empty())
            .ok_or_else(|| {
                ShopError::Session(format!(
                    "pincode {} not serviceable",
                    self.config.pincode
                ))
            })
    }

    /// Persist the store preference on the server side of the session
    async fn select_store(&self, context: &SessionContext) -> Result<(), ShopError> {
        let response = self
            .client
            .execute_with(|| {
                ApiRequest::put(
                    self.url("/entity/ms.settings/_/setPreferences"),
                    self.config.request_timeout,
                )
                .headers(context.signed_headers())
                .json(json!({ "data": { "store": context.store } }))
            })
            .await?;
        context.absorb_cookies(&response);

        Ok(())
    }
}

fn session_error(step: &str, error: ShopError) -> ShopError {
    match error {
        ShopError::Session(message) => ShopError::Session(format!("{}: {}", step, message)),
        other => ShopError::Session(format!("{} failed: {}", step, other)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::retry_client::RetryPolicy;
    use crate::test_support::ScriptedTransport;
    use crate::types::TransportError;

    fn bootstrapper(transport: Arc<ScriptedTransport>) -> SessionBootstrapper {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let config = SessionConfig {
            base_url: "https://shop.example".to_string(),
            pincode: "110001".to_string(),
            ..SessionConfig::default()
        };

        SessionBootstrapper::new(RetryClient::new(transport, policy), config)
    }

    fn happy_script() -> Vec<Result<ApiResponse, TransportError>> {
        vec![
            Ok(ApiResponse::new(200, "<html></html>")
                .with_header("Set-Cookie", "jsessionid=cookie-token; Path=/; HttpOnly")),
            Ok(ApiResponse::new(200, r#"session = {"tid":"tok-123","user":null};"#)),
            Ok(ApiResponse::new(
                200,
                r#"{"records":[{"pincode":"110002","substore":"noida"},{"pincode":"110001","substore":"delhi"}]}"#,
            )),
            Ok(ApiResponse::new(200, "{}").with_header("set-cookie", "store=delhi; Path=/")),
        ]
    }

    #[test]
    fn test_integrity_token_is_deterministic() {
        let first = integrity_token("salt", "tok", "delhi", 1_700_000_000_000);
        let second = integrity_token("salt", "tok", "delhi", 1_700_000_000_000);
        let later = integrity_token("salt", "tok", "delhi", 1_700_000_000_001);
        let other_token = integrity_token("salt", "other", "delhi", 1_700_000_000_000);

        assert_eq!(first, second);
        assert_ne!(first, later);
        assert_ne!(first, other_token);
        assert!(first.starts_with("delhi:1700000000000:"));
        assert_eq!(first.rsplit(':').next().unwrap().len(), 64);
    }

    fn integrity_value(headers: Vec<(String, String)>) -> Option<String> {
        headers
            .into_iter()
            .find(|(name, _)| name == INTEGRITY_HEADER)
            .map(|(_, value)| value)
    }

    #[test]
    fn test_deleted_cookie_is_not_sent_back() {
        let context =
            SessionContext::new("https://shop.example", "agent", "", "salt", "110001").unwrap();

        context.absorb_cookies(
            &ApiResponse::new(200, "").with_header("set-cookie", "jsessionid=abc; Path=/"),
        );
        assert_eq!(context.cookie("jsessionid").as_deref(), Some("abc"));

        context.absorb_cookies(&ApiResponse::new(200, "").with_header(
            "set-cookie",
            "jsessionid=deleted; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        ));
        assert_eq!(context.cookie_header(), None);
        assert_eq!(context.cookie("jsessionid"), None);
    }

    #[test]
    fn test_signed_headers_never_repeat_an_integrity_value() {
        let context = SessionContext::new("https://shop.example", "agent", "tok", "salt", "110001")
            .unwrap()
            .with_store("delhi");

        let first = integrity_value(context.signed_headers());
        let second = integrity_value(context.signed_headers());

        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_base_url_is_session_error() {
        let result = SessionContext::new("not a url", "agent", "", "salt", "110001");

        assert!(matches!(result, Err(ShopError::Session(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_selects_store_for_pincode() {
        let transport = Arc::new(ScriptedTransport::new(happy_script()));
        let context = bootstrapper(transport.clone()).bootstrap().await.unwrap();

        assert_eq!(context.store(), "delhi");
        assert_eq!(context.pincode(), "110001");
        assert_eq!(context.cookie("jsessionid").as_deref(), Some("cookie-token"));
        assert_eq!(context.cookie("store").as_deref(), Some("delhi"));
        assert_eq!(
            context.integrity_header(42),
            integrity_token("amul-shop-tid", "tok-123", "delhi", 42)
        );

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);

        let preferences = &requests[3];
        assert_eq!(preferences.method, reqwest::Method::PUT);
        assert!(preferences.url.ends_with("/entity/ms.settings/_/setPreferences"));
        assert_eq!(
            preferences.body,
            Some(json!({ "data": { "store": "delhi" } }))
        );
        assert_eq!(
            preferences.header_value("cookie"),
            Some("jsessionid=cookie-token")
        );
        assert!(preferences.header_value(INTEGRITY_HEADER).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_falls_back_to_session_cookie() {
        let mut script = happy_script();
        script[1] = Ok(ApiResponse::new(200, "session = {};"));

        let transport = Arc::new(ScriptedTransport::new(script));
        let context = bootstrapper(transport).bootstrap().await.unwrap();

        assert_eq!(
            context.integrity_header(7),
            integrity_token("amul-shop-tid", "cookie-token", "delhi", 7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_cookie_is_not_used_as_token() {
        let mut script = happy_script();
        script[1] = Ok(ApiResponse::new(200, "session = {};").with_header(
            "set-cookie",
            "jsessionid=deleted; Path=/; Max-Age=0",
        ));

        let transport = Arc::new(ScriptedTransport::new(script));
        let result = bootstrapper(transport.clone()).bootstrap().await;

        match result {
            Err(ShopError::Session(message)) => assert!(message.contains("no session token")),
            other => panic!("expected session error, got {:?}", other),
        }
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_selection_retry_is_resigned() {
        let mut script = happy_script();
        script.insert(3, Ok(ApiResponse::new(503, "")));

        let transport = Arc::new(ScriptedTransport::new(script));
        bootstrapper(transport.clone()).bootstrap().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 5);
        let first = requests[3].header_value(INTEGRITY_HEADER).map(str::to_string);
        let retry = requests[4].header_value(INTEGRITY_HEADER).map(str::to_string);
        assert!(first.is_some());
        assert_ne!(first, retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_exhaustion_is_session_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ApiResponse::new(503, "")),
            Ok(ApiResponse::new(503, "")),
        ]));

        let result = bootstrapper(transport.clone()).bootstrap().await;

        assert!(matches!(result, Err(ShopError::Session(_))));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unserviceable_pincode_is_session_error() {
        let mut script = happy_script();
        script[2] = Ok(ApiResponse::new(200, r#"{"records":[]}"#));

        let transport = Arc::new(ScriptedTransport::new(script));
        let result = bootstrapper(transport.clone()).bootstrap().await;

        match result {
            Err(ShopError::Session(message)) => assert!(message.contains("not serviceable")),
            other => panic!("expected session error, got {:?}", other),
        }
        assert_eq!(transport.request_count(), 3);
    }
}
