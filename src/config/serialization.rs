//! Config serialization to YAML
//!
//! Single source of truth for the config file format. Used by
//! `--show-config` and as the template users copy from.

use super::Config;

/// Quote a string as a YAML double-quoted scalar
///
/// JSON string syntax is a subset of YAML's double-quoted style.
fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

impl Config {
    /// Serialize the effective configuration as a commented YAML document
    pub fn to_yaml(&self) -> String {
        let mut output = String::new();

        output.push_str("# amp-proxy configuration\n");
        output.push('\n');
        output.push_str("# Port to listen on (0 = use -port flag)\n");
        output.push_str(&format!("port: {}\n", self.port));
        output.push_str("# Upstream service all traffic is forwarded to\n");
        output.push_str(&format!("upstream: {}\n", quote(self.upstream.as_str())));
        output.push('\n');
        output.push_str("# Rewrite isFreeTierRequest=false to true on webSearch2/extractWebPageContent\n");
        output.push_str(&format!("enable-free-search: {}\n", self.enable_free_search));
        output.push_str("# Apply model-mappings to /api/provider/anthropic/v1/messages\n");
        output.push_str(&format!(
            "enable-model-mapping: {}\n",
            self.enable_model_mapping
        ));
        output.push('\n');
        output.push_str(&self.mappings_to_yaml());
        output.push('\n');
        output.push_str(&self.logging_to_yaml());

        output
    }

    /// Serialize the mapping table, or a commented example when it is empty
    fn mappings_to_yaml(&self) -> String {
        if self.model_mappings.is_empty() {
            return r#"# First matching 'from' wins; later duplicates are ignored
model-mappings: []
# model-mappings:
#   - from: "claude-opus-4-5"
#     to: "claude-sonnet-4-5"
"#
            .to_string();
        }

        let mut output = String::from("# First matching 'from' wins; later duplicates are ignored\n");
        output.push_str("model-mappings:\n");
        for mapping in &self.model_mappings {
            output.push_str(&format!("  - from: {}\n", quote(&mapping.from)));
            output.push_str(&format!("    to: {}\n", quote(&mapping.to)));
        }
        output
    }

    fn logging_to_yaml(&self) -> String {
        let logging = &self.logging;
        let mut output = String::from("logging:\n");
        output.push_str("  # trace, debug, info, warn, error (RUST_LOG takes precedence)\n");
        output.push_str(&format!("  level: {}\n", quote(&logging.level)));
        output.push_str("  # Write JSON logs to rotating files in addition to stdout\n");
        output.push_str(&format!("  file-enabled: {}\n", logging.file_enabled));
        output.push_str(&format!(
            "  file-dir: {}\n",
            quote(&logging.file_dir.display().to_string())
        ));
        output.push_str("  # hourly, daily, never\n");
        output.push_str(&format!(
            "  file-rotation: {}\n",
            quote(logging.file_rotation.as_str())
        ));
        output.push_str(&format!("  file-prefix: {}\n", quote(&logging.file_prefix)));
        output
    }
}
