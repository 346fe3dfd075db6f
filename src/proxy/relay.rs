//! Response streaming and client cancellation tracking
//!
//! Long-lived streaming responses (SSE) are routinely abandoned by the client.
//! That is not an error: when the handler future or the response stream is
//! dropped before the upstream finished, the in-flight guard notes it at debug
//! level. Errors actually yielded by the upstream body are real transport
//! failures and are logged.

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use super::error::is_cancellation;

// ============================================================================
// In-Flight Guard
// ============================================================================

/// Tracks one proxied request until its response has been fully relayed
///
/// Dropping an armed guard means the client went away first.
#[derive(Debug)]
pub struct InFlight {
    method: Method,
    path: String,
    armed: bool,
}

impl InFlight {
    pub fn new(method: &Method, path: &str) -> Self {
        Self {
            method: method.clone(),
            path: path.to_string(),
            armed: true,
        }
    }

    /// Mark the exchange as finished (successfully or with a logged error)
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Disarm up front when the response can carry no body
    ///
    /// hyper never polls such a body to its end, so the guard would otherwise
    /// report a cancellation that didn't happen.
    pub fn settle_bodyless(&mut self, status: StatusCode) {
        if self.method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            self.disarm();
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(
                method = %self.method,
                path = %self.path,
                "Client canceled {} {} before the upstream finished",
                self.method,
                self.path
            );
        }
    }
}

// ============================================================================
// Relay Stream
// ============================================================================

/// Upstream body stream that reports how the relay ended
pub struct RelayStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    in_flight: InFlight,
}

impl RelayStream {
    pub fn new<S>(upstream: S, in_flight: InFlight) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: upstream.boxed(),
            in_flight,
        }
    }
}

impl Stream for RelayStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                this.in_flight.disarm();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(error))) => {
                if this.in_flight.is_armed() {
                    this.in_flight.disarm();
                    if is_cancellation(&error) {
                        tracing::debug!(
                            path = %this.in_flight.path,
                            "Upstream stream canceled: {}",
                            error
                        );
                    } else {
                        tracing::warn!(
                            method = %this.in_flight.method,
                            path = %this.in_flight.path,
                            error = %error,
                            "Upstream stream failed mid-response: {}",
                            error
                        );
                    }
                }
                Poll::Ready(Some(Err(error)))
            }
            other => other,
        }
    }
}
