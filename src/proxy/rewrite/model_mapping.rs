//! Model mapping rewriter
//!
//! Redirects Anthropic messages requests from one model to another. Mappings
//! are tried in configuration order; the first whose source appears as the
//! value of a `"model"` field replaces that first occurrence and ends the
//! search. The rewritten body is never scanned again, so `a -> b` followed by
//! `b -> c` maps `a` to `b`, not `c`.

use super::{FieldRewrite, Occurrences, RequestRewriter, RewriteOutcome};
use crate::config::ModelMapping;
use anyhow::Result;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashSet;

/// Field naming the model in Anthropic request bodies
pub const MODEL_FIELD: &str = "model";

struct MappingRule {
    mapping: ModelMapping,
    rewrite: FieldRewrite,
}

/// Compiled model mapping table
pub struct ModelMapper {
    rules: Vec<MappingRule>,
}

impl ModelMapper {
    /// Compile mappings in order. A later mapping with an already-seen source
    /// can never fire, so it is dropped with a warning.
    pub fn new(mappings: &[ModelMapping]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            if !seen.insert(mapping.from.as_str()) {
                tracing::warn!(
                    from = %mapping.from,
                    to = %mapping.to,
                    "Duplicate model mapping for {} ignored (first mapping wins)",
                    mapping.from
                );
                continue;
            }

            let rewrite = FieldRewrite::new(
                MODEL_FIELD,
                &Value::String(mapping.from.clone()),
                &Value::String(mapping.to.clone()),
                Occurrences::First,
            )?;
            rules.push(MappingRule {
                mapping: mapping.clone(),
                rewrite,
            });
        }

        Ok(Self { rules })
    }

    /// Number of effective (deduplicated) mappings
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Effective mappings, in lookup order
    pub fn mappings(&self) -> impl Iterator<Item = &ModelMapping> {
        self.rules.iter().map(|rule| &rule.mapping)
    }
}

impl RequestRewriter for ModelMapper {
    fn name(&self) -> &'static str {
        "model-mapping"
    }

    fn rewrite(&self, body: &[u8]) -> RewriteOutcome {
        for rule in &self.rules {
            if let Cow::Owned(rewritten) = rule.rewrite.apply(body) {
                return RewriteOutcome::Modified {
                    body: rewritten,
                    mapping: Some(rule.mapping.clone()),
                };
            }
        }
        RewriteOutcome::Unchanged
    }
}
