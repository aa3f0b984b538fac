use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Errors raised by notification channels.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Telegram Bot API errors.
    #[error("Telegram error: {0}")]
    Telegram(String),

    /// SMTP delivery errors.
    #[error("Email error: {0}")]
    Email(String),

    /// Channel configuration could not be used.
    #[error("Invalid channel configuration: {0}")]
    Config(String),
}

// Characters Telegram MarkdownV2 reserves outside entities
const MARKDOWN_RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

fn escape_markdown(text: &str) -> String {
    escape_with(text, MARKDOWN_RESERVED)
}

// Inside the (...) part of an inline link only these two need escaping
fn escape_link_target(url: &str) -> String {
    escape_with(url, &[')', '\\'])
}

fn escape_with(text: &str, reserved: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if reserved.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Why an alert is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The product moved into the available state.
    Transition,
    /// The run was started with the force-alert flag.
    Forced,
    /// The product stayed available past the reminder interval.
    Reminder,
}

impl AlertKind {
    /// Marker shown in front of the headline, if any.
    pub fn marker(self) -> Option<&'static str> {
        match self {
            AlertKind::Transition => None,
            AlertKind::Forced => Some("[FORCED]"),
            AlertKind::Reminder => Some("[REMINDER]"),
        }
    }
}

/// One availability alert, independent of the channel it goes out on.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    /// Product alias
    pub alias: String,
    /// Link to the product page
    pub product_url: String,
    /// Units in stock, when known
    pub inventory_quantity: Option<u64>,
    /// Listed price, when known
    pub price: Option<f64>,
    /// When availability was observed
    pub observed_at: DateTime<Utc>,
    /// Why the alert is sent
    pub kind: AlertKind,
    /// Offset used to render times for recipients
    pub display_offset: FixedOffset,
    /// Label printed after rendered times (e.g. "IST")
    pub display_label: String,
}

impl AlertMessage {
    fn headline(&self) -> String {
        match self.kind.marker() {
            Some(marker) => format!("{} Amul product available!", marker),
            None => "Amul product available!".to_string(),
        }
    }

    /// Observation time in the display offset
    pub fn local_time(&self) -> String {
        format!(
            "{} {}",
            self.observed_at
                .with_timezone(&self.display_offset)
                .format("%Y-%m-%d %H:%M:%S"),
            self.display_label
        )
    }

    fn stock_line(&self) -> String {
        let quantity = self
            .inventory_quantity
            .map(|quantity| quantity.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let price = self
            .price
            .map(|price| format!("₹{:.2}", price))
            .unwrap_or_else(|| "n/a".to_string());

        format!("Quantity: {} | Price: {}", quantity, price)
    }

    /// Email subject line
    pub fn subject(&self) -> String {
        match self.kind.marker() {
            Some(marker) => format!("{} Amul product available: {}", marker, self.alias),
            None => format!("Amul product available: {}", self.alias),
        }
    }

    /// Plain-text body
    pub fn plain_text(&self) -> String {
        let mut body = format!(
            "{}\n\n{}\n{}\n{}\nChecked: {}\n",
            self.headline(),
            self.alias,
            self.product_url,
            self.stock_line(),
            self.local_time()
        );

        if self.kind == AlertKind::Forced {
            body.push_str("\nThis alert was forced and does not indicate a new restock.\n");
        }

        body
    }

    /// Telegram MarkdownV2 body, every text fragment escaped
    pub fn markdown(&self) -> String {
        let mut body = format!(
            "*{}*\n[{}]({})\n{}\n_Time: {}_",
            escape_markdown(&self.headline()),
            escape_markdown(&self.alias),
            escape_link_target(&self.product_url),
            escape_markdown(&self.stock_line()),
            escape_markdown(&self.local_time())
        );

        if self.kind == AlertKind::Forced {
            body.push_str("\n_Forced alert, not a new restock\\._");
        }

        body
    }
}
