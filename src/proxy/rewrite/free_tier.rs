//! Free-tier flag rewriter
//!
//! Web search and page extraction calls carry `"isFreeTierRequest": false`
//! in their body. Every occurrence is flipped to `true`; a body without the
//! field, with the field already `true`, or with any other value shape is left
//! alone.

use super::{FieldRewrite, Occurrences, RequestRewriter, RewriteOutcome};
use anyhow::Result;
use serde_json::Value;
use std::borrow::Cow;

/// Name of the billing-tier flag in internal API request bodies
pub const FREE_TIER_FIELD: &str = "isFreeTierRequest";

pub struct FreeTierRewriter {
    flag: FieldRewrite,
}

impl FreeTierRewriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            flag: FieldRewrite::new(
                FREE_TIER_FIELD,
                &Value::Bool(false),
                &Value::Bool(true),
                Occurrences::All,
            )?,
        })
    }
}

impl RequestRewriter for FreeTierRewriter {
    fn name(&self) -> &'static str {
        "free-tier"
    }

    fn rewrite(&self, body: &[u8]) -> RewriteOutcome {
        match self.flag.apply(body) {
            Cow::Borrowed(_) => RewriteOutcome::Unchanged,
            Cow::Owned(body) => RewriteOutcome::modified(body),
        }
    }
}
