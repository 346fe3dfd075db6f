//! Proxy server setup and initialization

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;

use super::proxy_handler;
use super::state::ProxyState;

/// Build the router - every method and path goes to the proxy handler
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

/// Start the proxy server
///
/// Returns once `shutdown_rx` fires and in-flight requests have drained, or
/// with an error if the listener cannot be bound.
pub async fn start_proxy(
    config: Arc<Config>,
    state: ProxyState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr();
    let app = router(state);

    tracing::debug!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Proxy listening on {}", bind_addr);

    // Stop accepting on shutdown, then let existing requests finish
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_rx.await.ok();
    })
    .await
    .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every open request finished
    Drained,
    /// The grace period ran out with requests still open
    TimedOut,
    /// `force` fired before draining finished
    Forced,
}

/// Wait for the server task to drain after shutdown was signalled
///
/// Open SSE streams can last indefinitely, so the wait is bounded by `grace`
/// and cut short when `force` completes (a second Ctrl+C). The server task is
/// aborted in both of those cases.
pub async fn drain<F>(
    mut server: JoinHandle<Result<()>>,
    grace: Duration,
    force: F,
) -> Result<ShutdownOutcome>
where
    F: Future<Output = ()>,
{
    let outcome = tokio::select! {
        result = &mut server => {
            result.context("Proxy task panicked")??;
            return Ok(ShutdownOutcome::Drained);
        }
        _ = tokio::time::sleep(grace) => ShutdownOutcome::TimedOut,
        _ = force => ShutdownOutcome::Forced,
    };

    server.abort();
    Ok(outcome)
}
