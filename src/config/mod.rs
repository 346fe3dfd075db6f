//! Configuration for the proxy server
//!
//! Configuration is assembled in order of precedence:
//! 1. Config file (`config.yaml` by default), for the keys it sets
//! 2. Command-line flags
//! 3. Built-in defaults
//!
//! The resulting [`Config`] is built once at startup and never mutated.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod logging;
mod serialization;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (maintain public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use logging::{LogRotation, LoggingConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port the proxy listens on unless overridden
pub const DEFAULT_PORT: u16 = 8318;

/// Upstream service all traffic is forwarded to unless overridden
pub const DEFAULT_UPSTREAM: &str = "https://ampcode.com";

/// Config file looked up in the working directory unless overridden
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A model redirection rule: requests naming `from` are sent as `to`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelMapping {
    pub from: String,
    pub to: String,
}

#[cfg(test)]
impl ModelMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on (all interfaces, plain HTTP)
    pub port: u16,

    /// Upstream base URL (absolute, http or https)
    pub upstream: Url,

    /// Flip `isFreeTierRequest` to true on web search / page extraction calls
    pub enable_free_search: bool,

    /// Apply `model_mappings` to Anthropic messages requests
    pub enable_model_mapping: bool,

    /// Model redirection rules, in file order
    pub model_mappings: Vec<ModelMapping>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Path the config file was looked up at
    pub config_path: PathBuf,

    /// Whether a config file was found and applied
    pub config_loaded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upstream: Url::parse(DEFAULT_UPSTREAM).expect("default upstream is a valid URL"),
            enable_free_search: true,
            enable_model_mapping: true,
            model_mappings: Vec::new(),
            logging: LoggingConfig::default(),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            config_loaded: false,
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone)]
pub struct CliOverrides {
    pub port: u16,
    pub upstream: String,
    pub config_path: PathBuf,
    pub log_level: Option<String>,
}

impl Default for CliOverrides {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upstream: DEFAULT_UPSTREAM.to_string(),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            log_level: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure. Every key is optional; absent keys keep defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct FileConfig {
    /// Zero means "not set"
    pub port: Option<u16>,
    /// Empty means "not set"
    pub upstream: Option<String>,
    pub enable_free_search: Option<bool>,
    pub enable_model_mapping: Option<bool>,
    #[serde(default)]
    pub model_mappings: Vec<ModelMapping>,

    /// Optional `logging:` section
    pub logging: Option<LoggingConfig>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Load configuration: file -> command line -> defaults
    ///
    /// A missing config file is not an error. A file that exists but cannot be
    /// read or parsed is, and so is an invalid upstream URL or mapping.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let file = Self::load_file_config(&cli.config_path)?;
        Self::from_layers(cli, file)
    }

    /// Read and parse the YAML file at `path`, `None` if it doesn't exist
    fn load_file_config(path: &Path) -> Result<Option<FileConfig>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Cannot read config file {}", path.display()))
            }
        };

        // An empty (or comment-only) document parses as null
        let parsed: Option<FileConfig> = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Some(parsed.unwrap_or_default()))
    }

    /// Merge the file layer over the command-line layer
    pub(crate) fn from_layers(cli: &CliOverrides, file: Option<FileConfig>) -> Result<Self> {
        let config_loaded = file.is_some();
        let file = file.unwrap_or_default();

        // Port: file (when nonzero) > flag
        let port = file.port.filter(|p| *p != 0).unwrap_or(cli.port);

        // Upstream: file (when non-empty) > flag
        let upstream = file
            .upstream
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| cli.upstream.clone());
        let upstream = parse_upstream(&upstream)?;

        let model_mappings = validate_mappings(file.model_mappings)?;

        // Log level: flag > file > default
        let mut logging = file.logging.unwrap_or_default();
        if let Some(level) = &cli.log_level {
            logging.level = level.clone();
        }

        Ok(Self {
            port,
            upstream,
            enable_free_search: file.enable_free_search.unwrap_or(true),
            enable_model_mapping: file.enable_model_mapping.unwrap_or(true),
            model_mappings,
            logging,
            config_path: cli.config_path.clone(),
            config_loaded,
        })
    }

    /// Address to bind the listener to
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

/// Parse the upstream base URL, rejecting anything the HTTP client can't reach
fn parse_upstream(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid upstream URL: {}", raw))?;

    if !matches!(url.scheme(), "http" | "https") {
        bail!(
            "Invalid upstream URL: {} (scheme must be http or https, got {})",
            raw,
            url.scheme()
        );
    }
    if url.host_str().is_none() {
        bail!("Invalid upstream URL: {} (missing host)", raw);
    }

    Ok(url)
}

/// Reject mappings that could never match
fn validate_mappings(mappings: Vec<ModelMapping>) -> Result<Vec<ModelMapping>> {
    for (index, mapping) in mappings.iter().enumerate() {
        if mapping.from.is_empty() {
            bail!(
                "Invalid model mapping #{} (to {:?}): 'from' must not be empty",
                index + 1,
                mapping.to
            );
        }
    }
    Ok(mappings)
}
