use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{AlertMessage, NotificationError};

/// A delivery channel for alert messages (Telegram, email, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in logs and summaries.
    fn name(&self) -> &str;

    /// Deliver one message.
    async fn send(&self, message: &AlertMessage) -> Result<(), NotificationError>;
}

/// Outcome of dispatching one message over every channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Channels that accepted the message
    pub delivered: Vec<String>,
    /// Channels that failed
    pub failed: Vec<String>,
}

/// Sends alerts over zero or more channels.
///
/// A failing channel never stops delivery on the remaining ones.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over the given channels.
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Names of the configured channels.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .map(|channel| channel.name().to_string())
            .collect()
    }

    /// Sends the message once per channel and reports per-channel results.
    pub async fn dispatch(&self, message: &AlertMessage) -> DispatchReport {
        let mut report = DispatchReport::default();

        if self.channels.is_empty() {
            log::warn!(
                "⚠️ No notification channels configured, alert for {} not delivered",
                message.alias
            );
            return report;
        }

        for channel in &self.channels {
            match channel.send(message).await {
                Ok(()) => {
                    log::info!("✅ {} alert sent for {}", channel.name(), message.alias);
                    report.delivered.push(channel.name().to_string());
                }
                Err(e) => {
                    log::warn!(
                        "❌ {} alert failed for {}: {}",
                        channel.name(),
                        message.alias,
                        e
                    );
                    report.failed.push(channel.name().to_string());
                }
            }
        }

        report
    }
}
