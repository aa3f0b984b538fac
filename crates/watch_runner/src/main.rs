//! Entry point for one Amul availability check.
//! An external scheduler triggers it; every invocation runs once and exits.

use std::process::ExitCode;
use std::sync::Arc;

use amul_watch::{ChannelSet, WatchConfig, WatchError, WatchExecutor};
use anyhow::Context;
use shop_api::{HttpTransport, ReqwestTransport};

const EXIT_RUN_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn build_transport() -> anyhow::Result<Arc<dyn HttpTransport>> {
    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    Ok(Arc::new(transport))
}

fn exit_code(error: &WatchError) -> u8 {
    match error {
        WatchError::Config(_) => EXIT_CONFIG,
        WatchError::Session(_) | WatchError::Fetch(_) | WatchError::Store(_) => EXIT_RUN_FAILED,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("⚠️ Unable to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting Amul availability check...");

    let config = match WatchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ {}", e);
            log::error!("💡 Set AMUL_ALIASES and AMUL_PINCODE, e.g. in a .env file");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let transport = match build_transport() {
        Ok(transport) => transport,
        Err(e) => {
            log::error!("❌ {:#}", e);
            return ExitCode::from(EXIT_RUN_FAILED);
        }
    };

    let channels = ChannelSet::from_config(&config);
    log::info!(
        "📨 Channels enabled: {:?}, skipped: {:?}",
        channels.dispatcher.channel_names(),
        channels.skipped
    );
    let executor = WatchExecutor::new(&config, transport, channels);

    // Dropping the run future aborts in-flight requests; state is only written at its end
    tokio::select! {
        result = executor.run() => match result {
            Ok(summary) => {
                for line in summary.to_string().lines() {
                    log::info!("📊 {}", line);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("❌ Run failed: {}", e);
                ExitCode::from(exit_code(&e))
            }
        },
        _ = shutdown_signal() => {
            log::warn!("🛑 Interrupted, state file left as it was");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
