// Startup module - logs the effective configuration once the proxy is built
//
// Shows:
// - Version banner
// - Listen address, upstream, and the URL clients should point at
// - Which rewrites are active, with every model mapping
// - Where the configuration came from

use crate::config::{Config, VERSION};
use crate::proxy::ModelMapper;

/// Rewrite status for display
pub struct RewriteStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Status of each rewrite based on config and the effective mapping table
pub fn rewrite_status(config: &Config, mapper: &ModelMapper) -> Vec<RewriteStatus> {
    vec![
        RewriteStatus {
            name: "free-search",
            enabled: config.enable_free_search,
            description: "Free tier for web search and page extraction",
        },
        RewriteStatus {
            name: "model-mapping",
            // Mapping is inert without mappings
            enabled: config.enable_model_mapping && !mapper.is_empty(),
            description: "Model redirection on Anthropic messages",
        },
    ]
}

/// Log the startup banner and effective configuration
pub fn log_startup(config: &Config, mapper: &ModelMapper) {
    tracing::info!("amp-proxy v{}", VERSION);

    if config.config_loaded {
        tracing::info!("Config: {}", config.config_path.display());
    } else {
        tracing::info!(
            "Config: {} not found, using defaults",
            config.config_path.display()
        );
    }

    tracing::info!(
        "Free Proxy listening on {}, forwarding to {}",
        config.bind_addr(),
        config.upstream
    );
    tracing::info!("Configure upstream to: http://127.0.0.1:{}", config.port);
    tracing::info!("Free search enabled: {}", config.enable_free_search);
    tracing::info!("Model mapping enabled: {}", config.enable_model_mapping);

    for status in rewrite_status(config, mapper) {
        let icon = if status.enabled { "✓" } else { "○" };
        tracing::debug!("  {} {} - {}", icon, status.name, status.description);
    }

    if config.enable_model_mapping {
        for mapping in mapper.mappings() {
            tracing::info!("Model mapping: {} -> {}", mapping.from, mapping.to);
        }
        if !mapper.is_empty() {
            tracing::info!("Loaded {} model mapping(s)", mapper.len());
        }
    }

    if config.logging.file_enabled {
        tracing::info!(
            "File logging: {} ({} rotation)",
            config.logging.file_dir.display(),
            config.logging.file_rotation.as_str()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelMapping;

    fn mapper(mappings: &[ModelMapping]) -> ModelMapper {
        ModelMapper::new(mappings).unwrap()
    }

    #[test]
    fn test_rewrite_status_defaults() {
        let config = Config::default();
        let status = rewrite_status(&config, &mapper(&[]));

        assert_eq!(status[0].name, "free-search");
        assert!(status[0].enabled);
        // Enabled, but nothing to map
        assert_eq!(status[1].name, "model-mapping");
        assert!(!status[1].enabled);
    }

    #[test]
    fn test_rewrite_status_with_mappings() {
        let mappings = vec![ModelMapping::new("a", "b")];
        let config = Config {
            enable_free_search: false,
            model_mappings: mappings.clone(),
            ..Config::default()
        };
        let status = rewrite_status(&config, &mapper(&mappings));

        assert!(!status[0].enabled);
        assert!(status[1].enabled);
    }
}
