use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shop_api::{ProductSnapshot, ShopError};
use uuid::Uuid;

/// Durable record carried from one run to the next
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Latest snapshot per alias
    #[serde(default)]
    pub tracked: BTreeMap<String, ProductSnapshot>,

    /// Alerts raised so far, oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl PersistedState {
    /// When the most recent alert for an alias was raised
    pub fn last_alert_at(&self, alias: &str) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.alias == alias)
            .map(|entry| entry.observed_at)
    }

    /// Append an alert, dropping the oldest entries beyond `limit`
    pub fn push_history(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.push(entry);
        self.trim_history(limit);
    }

    /// Drop the oldest history entries beyond `limit`
    pub fn trim_history(&mut self, limit: usize) {
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// One raised alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Run that raised the alert
    #[serde(default)]
    pub run_id: Option<Uuid>,

    /// Product alias
    pub alias: String,

    /// Observation time of the snapshot that triggered the alert
    pub observed_at: DateTime<Utc>,

    /// Why the alert fired
    #[serde(default)]
    pub reason: Option<AlertReason>,

    /// Whether this was a forced alert
    #[serde(default)]
    pub forced: bool,

    /// Units in stock at alert time
    #[serde(default)]
    pub inventory_quantity: Option<u64>,

    /// Price at alert time
    #[serde(default)]
    pub price: Option<f64>,

    /// Channels that accepted the alert
    #[serde(default)]
    pub delivered: Vec<String>,

    /// Channels that failed to deliver it
    #[serde(default)]
    pub failed: Vec<String>,
}

/// Outcome of comparing two snapshots of one alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// No previous snapshot and the product is available
    FirstSeenAvailable,
    /// Previously not available (or unknown), now available
    BecameAvailable,
    /// Still available, force flag set
    Forced,
    /// Still available and the reminder interval has passed
    Reminder,
    /// Still available, nothing to report
    StillAvailable,
    /// Currently sold out
    NotAvailable,
    /// Current availability could not be determined
    AvailabilityUnknown,
}

impl AlertReason {
    /// Whether this outcome warrants a notification
    pub fn should_alert(self) -> bool {
        matches!(
            self,
            AlertReason::FirstSeenAvailable
                | AlertReason::BecameAvailable
                | AlertReason::Forced
                | AlertReason::Reminder
        )
    }
}

/// Per-alias alert decision; derived, never stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDecision {
    /// Product alias
    pub alias: String,
    /// Whether to notify
    pub should_alert: bool,
    /// Why
    pub reason: AlertReason,
}

/// Errors that end a run
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shop session could not be established
    #[error(transparent)]
    Session(ShopError),

    /// The product query failed
    #[error(transparent)]
    Fetch(ShopError),

    /// The state file could not be written
    #[error("State store error: {0}")]
    Store(#[from] std::io::Error),
}

/// Human-readable account of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Identifier of the run
    pub run_id: Uuid,
    /// Aliases queried
    pub aliases_checked: usize,
    /// Aliases currently available
    pub available: usize,
    /// Alerts raised
    pub alerts_sent: usize,
    /// Alerts raised because of the force flag
    pub forced_alerts: usize,
    /// Channel deliveries that failed
    pub deliveries_failed: usize,
    /// Per-alias parse problems
    pub parse_warnings: usize,
    /// Channels in use
    pub channels_enabled: Vec<String>,
    /// Channels disabled for missing credentials
    pub channels_skipped: Vec<String>,
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} complete", self.run_id)?;
        writeln!(
            f,
            "  aliases checked: {} ({} available, {} parse warnings)",
            self.aliases_checked, self.available, self.parse_warnings
        )?;
        writeln!(
            f,
            "  alerts sent: {} ({} forced, {} failed deliveries)",
            self.alerts_sent, self.forced_alerts, self.deliveries_failed
        )?;
        write!(
            f,
            "  channels: {} enabled, skipped: {}",
            list_or_none(&self.channels_enabled),
            list_or_none(&self.channels_skipped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(alias: &str, minute: u32) -> HistoryEntry {
        HistoryEntry {
            run_id: None,
            alias: alias.to_string(),
            observed_at: format!("2025-08-01T10:{:02}:00Z", minute).parse().unwrap(),
            reason: Some(AlertReason::BecameAvailable),
            forced: false,
            inventory_quantity: None,
            price: None,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    #[test]
    fn test_history_is_capped_oldest_first() {
        let mut state = PersistedState::default();
        for minute in 0..5 {
            state.push_history(entry("lassi", minute), 3);
        }

        assert_eq!(state.history.len(), 3);
        assert_eq!(
            state.history[0].observed_at,
            "2025-08-01T10:02:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_last_alert_at_picks_latest_for_alias() {
        let mut state = PersistedState::default();
        state.push_history(entry("lassi", 1), 10);
        state.push_history(entry("paneer", 2), 10);
        state.push_history(entry("lassi", 3), 10);

        assert_eq!(
            state.last_alert_at("lassi"),
            Some("2025-08-01T10:03:00Z".parse().unwrap())
        );
        assert!(state.last_alert_at("butter").is_none());
    }

    #[test]
    fn test_only_alerting_reasons_alert() {
        assert!(AlertReason::FirstSeenAvailable.should_alert());
        assert!(AlertReason::BecameAvailable.should_alert());
        assert!(AlertReason::Forced.should_alert());
        assert!(AlertReason::Reminder.should_alert());
        assert!(!AlertReason::StillAvailable.should_alert());
        assert!(!AlertReason::NotAvailable.should_alert());
        assert!(!AlertReason::AvailabilityUnknown.should_alert());
    }
}
