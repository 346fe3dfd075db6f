//! Forwarding hook - per-request body rewriting before transport
//!
//! Runs once for every outbound request, after the standard proxy fields have
//! been rewritten and before the request leaves the process:
//!
//! ```text
//! classify(path, query) ─ Passthrough ──────────────────────────→ body keeps streaming
//!          │
//!          └ FreeTier | ModelMapping → drain body → rewrite → reattach + fix lengths
//! ```
//!
//! # Fail-Safe Guarantee
//!
//! Nothing here fails the request. A body that cannot be read completely is
//! forwarded with whatever bytes arrived; a body that doesn't match is
//! forwarded unchanged.

use anyhow::Result;
use axum::http::{HeaderName, HeaderValue};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use super::classify::{Classifier, Policy};
use super::forward::{OutboundBody, OutboundRequest};
use super::rewrite::{FreeTierRewriter, ModelMapper, RequestRewriter, RewriteOutcome};
use crate::config::Config;

/// Header telling the upstream a mapped model request runs in free mode
pub const AMP_MODE_HEADER: HeaderName = HeaderName::from_static("x-amp-mode");

/// Request hook built once at startup and shared by all requests
pub struct RequestHook {
    classifier: Classifier,
    free_tier: FreeTierRewriter,
    model_mapper: ModelMapper,
}

impl RequestHook {
    pub fn from_config(config: &Config) -> Result<Self> {
        let model_mapper = ModelMapper::new(&config.model_mappings)?;
        let classifier = Classifier::new(
            config.enable_free_search,
            config.enable_model_mapping,
            model_mapper.len(),
        );

        Ok(Self {
            classifier,
            free_tier: FreeTierRewriter::new()?,
            model_mapper,
        })
    }

    /// Effective (deduplicated) model mappings
    pub fn model_mapper(&self) -> &ModelMapper {
        &self.model_mapper
    }

    /// Classify the request and rewrite its body if a policy applies
    pub async fn apply(&self, req: &mut OutboundRequest) {
        let policy = self
            .classifier
            .classify(&req.path, req.query.as_deref(), req.has_body);

        let rewriter: &dyn RequestRewriter = match policy {
            Policy::Passthrough => return,
            Policy::FreeTier => &self.free_tier,
            Policy::ModelMapping => &self.model_mapper,
        };

        // The body stream is not Sync: no borrow of `req` is held across the drain
        let path = req.path.clone();
        let query = req.query.clone().unwrap_or_default();
        let (bytes, complete) = drain_body(req.take_body(), &path, &query, rewriter.name()).await;

        // A truncated body is forwarded as-is, never rewritten
        let outcome = if complete {
            rewriter.rewrite(&bytes)
        } else {
            RewriteOutcome::Unchanged
        };

        match outcome {
            RewriteOutcome::Unchanged => {
                tracing::debug!(
                    rewriter = rewriter.name(),
                    path = %req.path,
                    "No rewrite applied"
                );
                req.set_buffered(bytes);
            }
            RewriteOutcome::Modified { body, mapping } => {
                req.set_buffered(Bytes::from(body));
                match mapping {
                    Some(mapping) => {
                        req.headers
                            .insert(AMP_MODE_HEADER, HeaderValue::from_static("free"));
                        tracing::info!(
                            from = %mapping.from,
                            to = %mapping.to,
                            "Mapped model: {} -> {}",
                            mapping.from,
                            mapping.to
                        );
                    }
                    None => {
                        tracing::info!(
                            query = %query,
                            "Modified {} request to use free tier",
                            query
                        );
                    }
                }
            }
        }
    }
}

/// Read the whole body into memory
///
/// Returns the bytes read and whether the body was read to the end. On a read
/// error the bytes received so far are kept.
async fn drain_body(body: OutboundBody, path: &str, query: &str, rewriter: &str) -> (Bytes, bool) {
    let body = match body {
        OutboundBody::Buffered(bytes) => return (bytes, true),
        OutboundBody::Streaming(body) => body,
    };

    let mut buffer = BytesMut::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(error) => {
                tracing::warn!(
                    rewriter,
                    path,
                    query,
                    bytes_read = buffer.len(),
                    error = %error,
                    "Could not read request body: {}",
                    error
                );
                return (buffer.freeze(), false);
            }
        }
    }

    (buffer.freeze(), true)
}

// ============================================================================
// Tests
// ============================================================================
