//! Request body rewriting
//!
//! Rewrites are textual substitutions on the raw body bytes, not a JSON
//! parse/modify/serialize cycle. Re-serializing would reorder keys and change
//! spacing; the upstream only ever sees the bytes the client sent, except for
//! the one field value being replaced.
//!
//! # Architecture
//!
//! ```text
//! body bytes → RequestRewriter (FreeTierRewriter | ModelMapper) → RewriteOutcome
//!                       │
//!                       └── FieldRewrite: `"field" : <old>` → `"field":<new>`
//! ```
//!
//! `FieldRewrite` is the only place that knows the substitution is regex
//! based; rewriters describe *what* to replace in terms of JSON values.

mod free_tier;
mod model_mapping;

pub use free_tier::FreeTierRewriter;
pub use model_mapping::ModelMapper;

use crate::config::ModelMapping;
use anyhow::{Context, Result};
use regex::bytes::{NoExpand, Regex};
use serde_json::Value;
use std::borrow::Cow;

// ============================================================================
// Rewrite Outcome
// ============================================================================

/// Result of rewriting a request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Body unchanged - forward the original bytes
    Unchanged,

    /// Body modified - forward these bytes instead
    Modified {
        /// The rewritten request body
        body: Vec<u8>,
        /// The mapping that produced this body, for model mapping rewrites
        mapping: Option<ModelMapping>,
    },
}

impl RewriteOutcome {
    /// Helper to create a Modified result with no mapping attached
    pub fn modified(body: Vec<u8>) -> Self {
        Self::Modified {
            body,
            mapping: None,
        }
    }
}

// ============================================================================
// Request Rewriter Trait
// ============================================================================

/// Trait for request body rewriters
///
/// `rewrite` is synchronous and must not fail: a body it cannot handle is
/// returned as `RewriteOutcome::Unchanged` and forwarded as-is.
pub trait RequestRewriter: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Rewrite a fully buffered request body
    fn rewrite(&self, body: &[u8]) -> RewriteOutcome;
}

// ============================================================================
// Field Rewrite
// ============================================================================

/// How many matches a [`FieldRewrite`] replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrences {
    /// Only the first match
    First,
    /// Every match
    All,
}

/// A compiled `"field": <value>` substitution
///
/// Matches the JSON-encoded field name, a colon with any surrounding
/// whitespace, and the JSON-encoded value. The replacement is written in
/// compact form (`"field":<new>`) and inserted literally.
#[derive(Debug, Clone)]
pub struct FieldRewrite {
    pattern: Regex,
    replacement: Vec<u8>,
    occurrences: Occurrences,
}

impl FieldRewrite {
    /// Compile a rewrite of `field` from `match_value` to `new_value`
    pub fn new(
        field: &str,
        match_value: &Value,
        new_value: &Value,
        occurrences: Occurrences,
    ) -> Result<Self> {
        let field_literal = Value::String(field.to_string()).to_string();
        let pattern = format!(
            r"{}\s*:\s*{}",
            regex::escape(&field_literal),
            regex::escape(&match_value.to_string())
        );
        let pattern = Regex::new(&pattern)
            .with_context(|| format!("Failed to compile rewrite pattern for field {}", field))?;

        Ok(Self {
            pattern,
            replacement: format!("{}:{}", field_literal, new_value).into_bytes(),
            occurrences,
        })
    }

    /// Apply the rewrite. `Cow::Borrowed` means nothing matched.
    pub fn apply<'a>(&self, body: &'a [u8]) -> Cow<'a, [u8]> {
        let replacement = NoExpand(&self.replacement);
        match self.occurrences {
            Occurrences::First => self.pattern.replace(body, replacement),
            Occurrences::All => self.pattern.replace_all(body, replacement),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
