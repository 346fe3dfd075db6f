//! Request classification
//!
//! Decides which rewrite (if any) applies to a request from its client-visible
//! path and raw query string. The two rewrite routes are disjoint, so at most
//! one policy matches.

/// Internal API endpoint hosting web search and page extraction
pub const INTERNAL_API_PATH: &str = "/api/internal";

/// Raw query strings (operation names) eligible for the free-tier rewrite
pub const FREE_TIER_OPERATIONS: [&str; 2] = ["webSearch2", "extractWebPageContent"];

/// Anthropic messages endpoint behind the provider proxy
pub const ANTHROPIC_MESSAGES_PATH: &str = "/api/provider/anthropic/v1/messages";

/// Rewrite policy for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Forward byte-for-byte
    Passthrough,
    /// Flip `isFreeTierRequest` to true
    FreeTier,
    /// Apply the model mapping table
    ModelMapping,
}

/// Classifier built once from the effective configuration
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    free_search: bool,
    model_mapping: bool,
}

impl Classifier {
    /// `mapping_count` is the number of configured mappings; with none, the
    /// model mapping route is never classified.
    pub fn new(free_search_enabled: bool, model_mapping_enabled: bool, mapping_count: usize) -> Self {
        Self {
            free_search: free_search_enabled,
            model_mapping: model_mapping_enabled && mapping_count > 0,
        }
    }

    pub fn classify(&self, path: &str, query: Option<&str>, has_body: bool) -> Policy {
        if !has_body {
            return Policy::Passthrough;
        }

        if self.free_search
            && path == INTERNAL_API_PATH
            && query.is_some_and(|q| FREE_TIER_OPERATIONS.contains(&q))
        {
            return Policy::FreeTier;
        }

        if self.model_mapping && path == ANTHROPIC_MESSAGES_PATH {
            return Policy::ModelMapping;
        }

        Policy::Passthrough
    }
}
