use std::sync::Arc;

use notification_services::{
    NotificationChannel, NotificationDispatcher, SmtpEmailService, TelegramService,
};
use tracing::{error, info, warn};

use crate::config::WatchConfig;

/// Notification channels that could be built, plus the names of those left out
pub struct ChannelSet {
    /// Dispatcher over every channel that was built
    pub dispatcher: NotificationDispatcher,

    /// Channels not configured, partially configured, or failing to build
    pub skipped: Vec<String>,
}

impl ChannelSet {
    /// Build a channel for every configured credential set.
    ///
    /// A channel whose constructor fails is reported in `skipped` next to the
    /// ones the configuration already left out.
    pub fn from_config(config: &WatchConfig) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        let mut skipped = config.skipped_channels.clone();

        if let Some(telegram) = config.telegram.clone() {
            match TelegramService::new(telegram) {
                Ok(service) => {
                    info!("Telegram channel enabled");
                    channels.push(Arc::new(service));
                }
                Err(e) => {
                    error!("Telegram channel disabled: {}", e);
                    skipped.push("telegram".to_string());
                }
            }
        }

        if let Some(smtp) = config.smtp.clone() {
            match SmtpEmailService::new(smtp) {
                Ok(service) => {
                    info!("Email channel enabled");
                    channels.push(Arc::new(service));
                }
                Err(e) => {
                    error!("Email channel disabled: {}", e);
                    skipped.push("email".to_string());
                }
            }
        }

        if channels.is_empty() {
            warn!("No notification channels enabled, alerts will only be logged");
        }

        Self {
            dispatcher: NotificationDispatcher::new(channels),
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> WatchConfig {
        let vars: HashMap<String, String> = [
            ("AMUL_ALIASES", "rose-lassi"),
            ("AMUL_PINCODE", "110001"),
        ]
        .iter()
        .chain(vars)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
        WatchConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_unbuildable_channel_is_reported_skipped() {
        let config = config(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "42"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USER", "watcher@example.com"),
            ("SMTP_PASS", "secret"),
            ("EMAIL_TO", "not an address"),
        ]);
        assert!(config.smtp.is_some());

        let channels = ChannelSet::from_config(&config);

        assert_eq!(channels.dispatcher.channel_names(), vec!["telegram"]);
        assert_eq!(channels.skipped, vec!["email"]);
    }

    #[tokio::test]
    async fn test_unconfigured_channels_stay_skipped() {
        let channels = ChannelSet::from_config(&config(&[]));

        assert!(channels.dispatcher.channel_names().is_empty());
        assert_eq!(channels.skipped, vec!["telegram", "email"]);
    }
}
