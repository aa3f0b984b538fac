use std::sync::Arc;

use shop_api::{HttpTransport, ProductFetcher, RetryClient, SessionBootstrapper};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alert_engine::AlertEngine;
use crate::channels::ChannelSet;
use crate::config::WatchConfig;
use crate::state_store::StateStore;
use crate::watch_types::{RunSummary, WatchError};

/// Runs one availability check from session bootstrap to state write
pub struct WatchExecutor {
    bootstrapper: SessionBootstrapper,
    fetcher: ProductFetcher,
    store: StateStore,
    engine: AlertEngine,
    aliases: Vec<String>,
    force_alert: bool,
    skipped_channels: Vec<String>,
}

impl WatchExecutor {
    /// Wire the pipeline for `config` over `transport`
    pub fn new(
        config: &WatchConfig,
        transport: Arc<dyn HttpTransport>,
        channels: ChannelSet,
    ) -> Self {
        let client = RetryClient::new(transport, config.retry_policy());

        Self {
            bootstrapper: SessionBootstrapper::new(client.clone(), config.session_config()),
            fetcher: ProductFetcher::new(client, config.fetcher_config()),
            store: StateStore::new(&config.state_file),
            engine: AlertEngine::new(channels.dispatcher, config.engine_config()),
            aliases: config.aliases.clone(),
            force_alert: config.force_alert,
            skipped_channels: channels.skipped,
        }
    }

    /// Execute one run.
    ///
    /// Session and fetch failures return before the state file is read, so the
    /// last good state stays on disk untouched.
    pub async fn run(&self) -> Result<RunSummary, WatchError> {
        let run_id = Uuid::new_v4();
        info!(
            "Run {} checking {} alias(es){}",
            run_id,
            self.aliases.len(),
            if self.force_alert { " (forced)" } else { "" }
        );

        let session = self.bootstrapper.bootstrap().await.map_err(|e| {
            error!("Session bootstrap failed: {}", e);
            WatchError::Session(e)
        })?;

        let outcome = self
            .fetcher
            .fetch(&session, &self.aliases)
            .await
            .map_err(|e| {
                error!("Product fetch failed: {}", e);
                WatchError::Fetch(e)
            })?;

        let available = outcome
            .snapshots
            .values()
            .filter(|snapshot| snapshot.available.is_available())
            .count();

        let mut state = self.store.load();
        let report = self
            .engine
            .process(
                &mut state,
                outcome.snapshots,
                &self.aliases,
                self.force_alert,
                run_id,
            )
            .await;

        if let Err(e) = self.store.save(&state) {
            error!(
                "Failed to write state to {}: {}",
                self.store.path().display(),
                e
            );
            return Err(WatchError::Store(e));
        }

        if report.deliveries_failed > 0 {
            warn!(
                "{} notification deliveries failed this run",
                report.deliveries_failed
            );
        }

        Ok(RunSummary {
            run_id,
            aliases_checked: self.aliases.len(),
            available,
            alerts_sent: report.alerts_sent,
            forced_alerts: report.forced_alerts,
            deliveries_failed: report.deliveries_failed,
            parse_warnings: outcome.warnings.len(),
            channels_enabled: self.engine.channel_names(),
            channels_skipped: self.skipped_channels.clone(),
        })
    }
}
