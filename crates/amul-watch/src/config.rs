use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use notification_services::{SmtpConfig, TelegramConfig};
use regex::Regex;
use shop_api::{FetcherConfig, RetryPolicy, SessionConfig};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::alert_engine::EngineConfig;
use crate::watch_types::WatchError;

// Regex for product aliases as they appear in shop URLs
static ALIAS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

fn validate_aliases(aliases: &[String]) -> Result<(), ValidationError> {
    match aliases.iter().find(|alias| !ALIAS_REGEX.is_match(alias)) {
        Some(alias) => Err(ValidationError::new("invalid_alias")
            .with_message(format!("invalid product alias {:?}", alias).into())),
        None => Ok(()),
    }
}

fn validate_base_url(base_url: &str) -> Result<(), ValidationError> {
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_base_url")
            .with_message("base URL must start with http:// or https://".into()))
    }
}

/// Everything one run needs, read from the environment
#[derive(Debug, Clone, Validate)]
pub struct WatchConfig {
    /// Product aliases to watch, deduplicated, in configured order
    #[validate(
        length(min = 1, message = "at least one product alias is required"),
        custom(function = "validate_aliases")
    )]
    pub aliases: Vec<String>,

    /// Delivery pincode
    #[validate(length(min = 1, message = "pincode is required"))]
    pub pincode: String,

    /// Shop base URL (default: https://shop.amul.com)
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,

    /// State file location (default: state.json)
    pub state_file: PathBuf,

    /// Alert for every available product regardless of state
    pub force_alert: bool,

    /// Per-request timeout in seconds (default: 30)
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Attempts per request (default: 3)
    #[validate(range(min = 1, max = 10))]
    pub retry_max_attempts: u32,

    /// First backoff delay in milliseconds (default: 2000)
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds (default: 30000)
    pub retry_max_delay_ms: u64,

    /// Maximum random jitter in milliseconds (default: 2000)
    pub retry_jitter_ms: u64,

    /// Aliases per product query (default: 20)
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// History entries kept (default: 200)
    #[validate(range(min = 1))]
    pub history_limit: usize,

    /// Reminder interval in hours; unset disables reminders
    #[validate(range(min = 1))]
    pub realert_hours: Option<u32>,

    /// Display offset from UTC in minutes (default: 330)
    #[validate(range(min = -720, max = 840))]
    pub display_utc_offset_minutes: i32,

    /// Label shown after rendered times (default: IST)
    pub display_timezone_label: String,

    /// Telegram credentials, when complete
    pub telegram: Option<TelegramConfig>,

    /// SMTP settings, when complete
    pub smtp: Option<SmtpConfig>,

    /// Channels left out for missing credentials
    pub skipped_channels: Vec<String>,
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, WatchError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| WatchError::Config(format!("{}={:?} is invalid: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_aliases(raw: &str) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for alias in raw.split(',').map(str::trim).filter(|alias| !alias.is_empty()) {
        if !aliases.iter().any(|seen| seen == alias) {
            aliases.push(alias.to_string());
        }
    }
    aliases
}

fn telegram_from<F>(lookup: &F, skipped: &mut Vec<String>) -> Option<TelegramConfig>
where
    F: Fn(&str) -> Option<String>,
{
    match (
        non_empty(lookup, "TELEGRAM_BOT_TOKEN"),
        non_empty(lookup, "TELEGRAM_CHAT_ID"),
    ) {
        (Some(token), Some(chat_id)) => Some(TelegramConfig::new(&token, &chat_id)),
        (None, None) => {
            info!("Telegram channel not configured");
            skipped.push("telegram".to_string());
            None
        }
        _ => {
            info!("Telegram channel skipped: TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must both be set");
            skipped.push("telegram".to_string());
            None
        }
    }
}

fn smtp_from<F>(lookup: &F, skipped: &mut Vec<String>) -> Result<Option<SmtpConfig>, WatchError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = non_empty(lookup, "SMTP_HOST");
    let username = non_empty(lookup, "SMTP_USER");
    let password = non_empty(lookup, "SMTP_PASS");
    let to = non_empty(lookup, "EMAIL_TO");

    match (host, username, password, to) {
        (Some(host), Some(username), Some(password), Some(to)) => {
            let from = non_empty(lookup, "EMAIL_FROM").unwrap_or_else(|| username.clone());
            Ok(Some(SmtpConfig {
                host,
                port: parse_or(lookup, "SMTP_PORT", 587)?,
                username,
                password,
                to,
                from,
                timeout: Duration::from_secs(15),
            }))
        }
        (None, None, None, None) => {
            info!("Email channel not configured");
            skipped.push("email".to_string());
            Ok(None)
        }
        _ => {
            info!("Email channel skipped: SMTP_HOST, SMTP_USER, SMTP_PASS and EMAIL_TO must all be set");
            skipped.push("email".to_string());
            Ok(None)
        }
    }
}

impl WatchConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, WatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, then validate it
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let aliases = non_empty(&lookup, "AMUL_ALIASES")
            .map(|raw| parse_aliases(&raw))
            .unwrap_or_default();
        let pincode = non_empty(&lookup, "AMUL_PINCODE").unwrap_or_default();

        let mut skipped_channels = Vec::new();
        let telegram = telegram_from(&lookup, &mut skipped_channels);
        let smtp = smtp_from(&lookup, &mut skipped_channels)?;

        let config = Self {
            aliases,
            pincode,
            base_url: non_empty(&lookup, "AMUL_BASE_URL")
                .unwrap_or_else(|| "https://shop.amul.com".to_string()),
            state_file: non_empty(&lookup, "STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("state.json")),
            force_alert: parse_flag(lookup("FORCE_ALERT")),
            request_timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30)?,
            retry_max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_or(&lookup, "RETRY_BASE_DELAY_MS", 2000)?,
            retry_max_delay_ms: parse_or(&lookup, "RETRY_MAX_DELAY_MS", 30_000)?,
            retry_jitter_ms: parse_or(&lookup, "RETRY_JITTER_MS", 2000)?,
            batch_size: parse_or(&lookup, "FETCH_BATCH_SIZE", 20)?,
            history_limit: parse_or(&lookup, "HISTORY_LIMIT", 200)?,
            realert_hours: match non_empty(&lookup, "RE_ALERT_HOURS") {
                Some(_) => Some(parse_or(&lookup, "RE_ALERT_HOURS", 0)?),
                None => None,
            },
            display_utc_offset_minutes: parse_or(&lookup, "DISPLAY_UTC_OFFSET_MINUTES", 330)?,
            display_timezone_label: non_empty(&lookup, "DISPLAY_TIMEZONE_LABEL")
                .unwrap_or_else(|| "IST".to_string()),
            telegram,
            smtp,
            skipped_channels,
        };

        config
            .validate()
            .map_err(|e| WatchError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Backoff settings for every shop request
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }

    /// Session bootstrap settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url.clone(),
            pincode: self.pincode.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..SessionConfig::default()
        }
    }

    /// Product query settings
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            batch_size: self.batch_size,
        }
    }

    /// Alert engine settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            base_url: self.base_url.clone(),
            history_limit: self.history_limit,
            realert_after: self
                .realert_hours
                .map(|hours| chrono::Duration::hours(i64::from(hours))),
            display_offset: FixedOffset::east_opt(self.display_utc_offset_minutes * 60)
                .unwrap_or_else(|| Utc.fix()),
            display_label: self.display_timezone_label.clone(),
        }
    }
}
