use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use notification_services::{AlertKind, AlertMessage, NotificationDispatcher};
use shop_api::{Availability, ProductSnapshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::watch_types::{AlertDecision, AlertReason, HistoryEntry, PersistedState};

/// Knobs for turning snapshots into alerts
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shop base URL, used to build product links
    pub base_url: String,

    /// Maximum number of history entries kept (default: 200)
    pub history_limit: usize,

    /// Re-alert for products that stay available this long; `None` disables reminders
    pub realert_after: Option<Duration>,

    /// Offset used to render times in messages (default: UTC)
    pub display_offset: FixedOffset,

    /// Label printed after rendered times (default: UTC)
    pub display_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://shop.amul.com".to_string(),
            history_limit: 200,
            realert_after: None,
            display_offset: Utc.fix(),
            display_label: "UTC".to_string(),
        }
    }
}

/// Decide whether one alias warrants an alert.
///
/// Only a definite `Available` can alert. A missing or non-available previous
/// snapshot makes it a transition. A still-available product alerts only when
/// forced or when the reminder interval since `last_alert_at` has passed.
pub fn decide(
    previous: Option<&ProductSnapshot>,
    current: &ProductSnapshot,
    force: bool,
    realert_after: Option<Duration>,
    last_alert_at: Option<DateTime<Utc>>,
) -> AlertDecision {
    let reason = match current.available {
        Availability::Unavailable => AlertReason::NotAvailable,
        Availability::Unknown => AlertReason::AvailabilityUnknown,
        Availability::Available => match previous.map(|snapshot| snapshot.available) {
            None => AlertReason::FirstSeenAvailable,
            Some(Availability::Available) => {
                if force {
                    AlertReason::Forced
                } else if reminder_due(current.observed_at, realert_after, last_alert_at) {
                    AlertReason::Reminder
                } else {
                    AlertReason::StillAvailable
                }
            }
            Some(_) => AlertReason::BecameAvailable,
        },
    };

    AlertDecision {
        alias: current.alias.clone(),
        should_alert: reason.should_alert(),
        reason,
    }
}

fn reminder_due(
    now: DateTime<Utc>,
    realert_after: Option<Duration>,
    last_alert_at: Option<DateTime<Utc>>,
) -> bool {
    match (realert_after, last_alert_at) {
        (Some(interval), Some(last)) => now - last >= interval,
        // Available since before history began, never alerted
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Counters produced by one engine pass
#[derive(Debug, Default, Clone)]
pub struct EngineReport {
    /// Every decision, in alias order
    pub decisions: Vec<AlertDecision>,
    /// Alerts raised
    pub alerts_sent: usize,
    /// Alerts raised because of the force flag
    pub forced_alerts: usize,
    /// Failed channel deliveries across all alerts
    pub deliveries_failed: usize,
}

/// Compares fresh snapshots with the stored state and dispatches alerts
pub struct AlertEngine {
    dispatcher: NotificationDispatcher,
    config: EngineConfig,
}

impl AlertEngine {
    /// Create a new engine
    pub fn new(dispatcher: NotificationDispatcher, config: EngineConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Channels alerts go out on
    pub fn channel_names(&self) -> Vec<String> {
        self.dispatcher.channel_names()
    }

    fn product_url(&self, alias: &str) -> String {
        format!(
            "{}/en/product/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(alias)
        )
    }

    fn message_for(&self, snapshot: &ProductSnapshot, kind: AlertKind) -> AlertMessage {
        AlertMessage {
            alias: snapshot.alias.clone(),
            product_url: self.product_url(&snapshot.alias),
            inventory_quantity: snapshot.inventory_quantity,
            price: snapshot.price,
            observed_at: snapshot.observed_at,
            kind,
            display_offset: self.config.display_offset,
            display_label: self.config.display_label.clone(),
        }
    }

    /// Run one pass over `snapshots`.
    ///
    /// Alerts are dispatched and recorded in history whatever the channels
    /// report. Afterwards `state.tracked` is replaced by `snapshots`, so aliases
    /// no longer configured stop being tracked.
    pub async fn process(
        &self,
        state: &mut PersistedState,
        snapshots: BTreeMap<String, ProductSnapshot>,
        aliases: &[String],
        force: bool,
        run_id: Uuid,
    ) -> EngineReport {
        let mut report = EngineReport::default();

        for alias in aliases {
            let Some(current) = snapshots.get(alias) else {
                continue;
            };
            let decision = decide(
                state.tracked.get(alias),
                current,
                force,
                self.config.realert_after,
                state.last_alert_at(alias),
            );

            if !decision.should_alert {
                debug!("{}: {} ({:?})", alias, current.available, decision.reason);
                report.decisions.push(decision);
                continue;
            }

            let kind = match decision.reason {
                AlertReason::Forced => AlertKind::Forced,
                AlertReason::Reminder => AlertKind::Reminder,
                _ => AlertKind::Transition,
            };
            info!("Alerting for {} ({:?})", alias, decision.reason);

            let dispatch = self
                .dispatcher
                .dispatch(&self.message_for(current, kind))
                .await;

            report.alerts_sent += 1;
            if kind == AlertKind::Forced {
                report.forced_alerts += 1;
            }
            report.deliveries_failed += dispatch.failed.len();

            state.push_history(
                HistoryEntry {
                    run_id: Some(run_id),
                    alias: alias.clone(),
                    observed_at: current.observed_at,
                    reason: Some(decision.reason),
                    forced: kind == AlertKind::Forced,
                    inventory_quantity: current.inventory_quantity,
                    price: current.price,
                    delivered: dispatch.delivered,
                    failed: dispatch.failed,
                },
                self.config.history_limit,
            );
            report.decisions.push(decision);
        }

        state.tracked = snapshots;
        state.trim_history(self.config.history_limit);
        report
    }
}
