//! # Notification Services
//!
//! This crate delivers availability alerts. It defines the channel
//! abstraction, the dispatcher that fans a message out over every configured
//! channel, and the Telegram and SMTP channel implementations.

/// Channel trait and the dispatcher.
pub mod service;
/// Alert message and error types.
pub mod types;

/// Telegram bot channel.
mod telegram_service;
pub use telegram_service::{TelegramConfig, TelegramService};

/// SMTP email channel.
mod email_service;
pub use email_service::{SmtpConfig, SmtpEmailService};

pub use service::{DispatchReport, NotificationChannel, NotificationDispatcher};
pub use types::{AlertKind, AlertMessage, NotificationError};
