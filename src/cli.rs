// CLI module - command-line argument parsing
//
// Flags are accepted both Go-style (`-port 8318`, `-config=x.yaml`) and
// GNU-style (`--port 8318`). Single-dash long flags are normalized before clap
// sees them.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{CliOverrides, DEFAULT_CONFIG_PATH, DEFAULT_PORT, DEFAULT_UPSTREAM, VERSION};

/// Long flag names that may also be written with a single dash
const LONG_FLAGS: [&str; 7] = [
    "port",
    "upstream",
    "config",
    "log-level",
    "show-config",
    "help",
    "version",
];

/// Amp Proxy - forwards Amp traffic and rewrites selected request bodies
#[derive(Parser, Debug)]
#[command(name = "amp-proxy")]
#[command(version = VERSION)]
#[command(about = "Transparent Amp proxy with free-tier and model mapping rewrites", long_about = None)]
pub struct Cli {
    /// Port to listen on (a nonzero `port` in the config file takes precedence)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Upstream base URL (a non-empty `upstream` in the config file takes precedence)
    #[arg(long, default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,

    /// Path to the YAML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level filter, overrides `logging.level` (RUST_LOG still wins)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    pub show_config: bool,
}

impl Cli {
    /// Parse the process arguments
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_flags(std::env::args_os()))
    }

    /// Values the config loader layers under the config file
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            port: self.port,
            upstream: self.upstream.clone(),
            config_path: self.config.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Rewrite `-name` / `-name=value` into `--name` / `--name=value` for known
/// long flags, stopping at a bare `--`
pub fn normalize_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }
            match text.strip_prefix('-') {
                Some(rest) if !rest.starts_with('-') && is_long_flag(rest) => {
                    OsString::from(format!("-{}", text))
                }
                _ => arg,
            }
        })
        .collect()
}

fn is_long_flag(flag: &str) -> bool {
    let name = flag.split_once('=').map_or(flag, |(name, _)| name);
    LONG_FLAGS.contains(&name)
}
