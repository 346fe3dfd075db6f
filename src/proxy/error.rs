//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

/// Errors that can occur during proxying
#[derive(Debug)]
pub(crate) enum ProxyError {
    /// The upstream request failed before a response head arrived
    Upstream(reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let (status, message) = match self {
            ProxyError::Upstream(error) => {
                if is_cancellation(&error) {
                    tracing::debug!("Upstream request canceled: {}", error);
                } else {
                    tracing::error!(error = %error, "Proxy error: {}", error);
                }
                (StatusCode::BAD_GATEWAY, format!("Upstream request failed: {}", error))
            }
        };

        Response::builder()
            .status(status)
            .body(Body::from(message))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}

/// Whether an error (or anything in its source chain) is a cancellation
///
/// Cancellations happen when the client hangs up mid-exchange and are the
/// normal end of an interrupted stream, not a transport failure.
pub(crate) fn is_cancellation(error: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(error), |e| e.source()).any(|e| {
        let message = e.to_string().to_lowercase();
        message.contains("canceled") || message.contains("cancelled")
    })
}
