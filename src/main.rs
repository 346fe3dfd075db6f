// Amp Proxy - transparent forwarding proxy for the Amp service
//
// Sits between the Amp client and https://ampcode.com, forwarding all traffic
// unchanged except for two request-body rewrites:
// - Web search / page extraction calls are flagged as free tier
// - Anthropic messages calls have their model swapped via a mapping table
//
// Architecture:
// - Config: YAML file layered over command-line flags, validated once
// - Proxy server (axum): catch-all handler forwarding through reqwest
// - Hook: classifies each request and rewrites its buffered body
// - Responses (including SSE) are streamed back chunk by chunk

mod cli;
mod config;
mod logging;
mod proxy;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use proxy::{ProxyState, ShutdownOutcome};

/// How long open requests (mostly SSE streams) get to finish after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse_args();

    // Config errors are fatal before anything is logged
    let config = Config::load(&cli.overrides()).context("Failed to load configuration")?;

    if cli.show_config {
        print!("{}", config.to_yaml());
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _file_guard = logging::init(&config.logging);

    let config = Arc::new(config);
    let state = ProxyState::from_config(&config)?;

    startup::log_startup(&config, state.hook().model_mapper());

    // Create shutdown channel for graceful proxy shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut proxy_handle = tokio::spawn(proxy::start_proxy(config.clone(), state, shutdown_rx));

    tokio::select! {
        // The server only returns early on failure (e.g. the port is taken)
        result = &mut proxy_handle => {
            let result = result.context("Proxy task panicked")?;
            if let Err(e) = &result {
                tracing::error!("Proxy server failed: {:#}", e);
            }
            return result;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
        }
    }

    tracing::info!("Shutting down...");

    // If the send fails, the proxy has already shut down (which is fine)
    let _ = shutdown_tx.send(());

    let second_ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    match proxy::drain(proxy_handle, SHUTDOWN_GRACE, second_ctrl_c).await? {
        ShutdownOutcome::Drained => {}
        ShutdownOutcome::TimedOut => tracing::warn!(
            "Open connections still active after {}s, closing them",
            SHUTDOWN_GRACE.as_secs()
        ),
        ShutdownOutcome::Forced => {
            tracing::warn!("Second Ctrl+C, closing open connections")
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
