use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::service::NotificationChannel;
use crate::types::{AlertMessage, NotificationError};

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Relay host name
    pub host: String,
    /// Relay port, STARTTLS (default: 587)
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Recipient address
    pub to: String,
    /// Sender address
    pub from: String,
    /// Connection timeout (default: 15 seconds)
    pub timeout: Duration,
}

/// Email channel over an authenticated SMTP relay
pub struct SmtpEmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpEmailService {
    /// Create a new SMTP channel; addresses are validated up front
    pub fn new(config: SmtpConfig) -> Result<Self, NotificationError> {
        let from: Mailbox = config.from.parse().map_err(|e| {
            NotificationError::Config(format!("invalid sender {}: {}", config.from, e))
        })?;
        let to: Mailbox = config.to.parse().map_err(|e| {
            NotificationError::Config(format!("invalid recipient {}: {}", config.to, e))
        })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotificationError::Config(format!("invalid SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(Credentials::new(config.username, config.password))
            .timeout(Some(config.timeout))
            .build();

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl NotificationChannel for SmtpEmailService {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotificationError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(message.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(message.plain_text())
            .map_err(|e| NotificationError::Email(format!("Failed to build email: {}", e)))?;

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| NotificationError::Email(e.to_string()))?;

        log::debug!("📧 SMTP relay answered {}", response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "watcher@example.com".to_string(),
            password: "secret".to_string(),
            to: "me@example.com".to_string(),
            from: "watcher@example.com".to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let result = SmtpEmailService::new(SmtpConfig {
            to: "not an address".to_string(),
            ..config()
        });

        assert!(matches!(result, Err(NotificationError::Config(_))));
    }

    #[tokio::test]
    async fn test_valid_config_builds_channel() {
        let service = SmtpEmailService::new(config()).unwrap();

        assert_eq!(service.name(), "email");
    }
}
