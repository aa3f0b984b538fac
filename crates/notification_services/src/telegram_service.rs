use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::service::NotificationChannel;
use crate::types::{AlertMessage, NotificationError};

/// Credentials for the Telegram Bot API
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    pub bot_token: String,
    /// Chat the alerts are posted to
    pub chat_id: String,
    /// Bot API base URL (default: https://api.telegram.org)
    pub api_base: String,
    /// Request timeout (default: 15 seconds)
    pub timeout: Duration,
}

impl TelegramConfig {
    /// Config for the public Bot API
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            api_base: "https://api.telegram.org".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Telegram bot channel
pub struct TelegramService {
    client: Client,
    config: TelegramConfig,
}

impl TelegramService {
    /// Create a new Telegram channel
    pub fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                NotificationError::Telegram(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl NotificationChannel for TelegramService {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotificationError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );

        let request = SendMessageRequest {
            chat_id: &self.config.chat_id,
            text: message.markdown(),
            parse_mode: "MarkdownV2",
        };

        // The URL embeds the bot token, keep it out of error messages
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::Telegram(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(NotificationError::Telegram(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        log::debug!("Telegram message posted to chat {}", self.config.chat_id);
        Ok(())
    }
}
