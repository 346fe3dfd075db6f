//! Proxy state shared by every request handler

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;

use crate::config::Config;

use super::hook::RequestHook;

/// Connect timeout for upstream connections; there is no total timeout so
/// long-lived streams are never cut off
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the proxy server
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests
    pub(super) client: reqwest::Client,
    /// Upstream base URL every request is forwarded to
    pub(super) upstream: Arc<Url>,
    /// Per-request body rewriting
    pub(super) hook: Arc<RequestHook>,
}

impl ProxyState {
    pub fn from_config(config: &Config) -> Result<Self> {
        // NOTE: No default User-Agent set - the client's own User-Agent is forwarded.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(10)
            .http1_only()
            // Redirects go back to the client untouched
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        let hook = RequestHook::from_config(config).context("Failed to build request hook")?;

        Ok(Self {
            client,
            upstream: Arc::new(config.upstream.clone()),
            hook: Arc::new(hook),
        })
    }

    pub fn hook(&self) -> &RequestHook {
        &self.hook
    }
}
