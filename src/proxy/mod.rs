// Proxy module - HTTP server that forwards every request to the upstream
//
// All traffic is forwarded unchanged except two request kinds whose JSON
// bodies are rewritten on the way out: free-tier search/extraction calls and
// Anthropic messages calls covered by the model mapping table. Responses are
// always streamed back as they arrive.

mod classify;
mod error;
mod forward;
mod hook;
mod relay;
mod rewrite;
mod server;
mod state;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    response::IntoResponse,
};

pub use rewrite::ModelMapper;
pub use server::{drain, router, start_proxy, ShutdownOutcome};
pub use state::ProxyState;

use error::ProxyError;
use forward::OutboundRequest;
use relay::InFlight;

/// Main proxy handler - forwards every request to the upstream
async fn proxy_handler(
    State(state): State<ProxyState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Response<Body> {
    let client_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let mut in_flight = InFlight::new(req.method(), req.uri().path());

    let mut outbound = OutboundRequest::from_inbound(req, &state.upstream, client_addr);
    state.hook.apply(&mut outbound).await;

    tracing::debug!(
        method = %outbound.method,
        url = %outbound.url,
        content_length = ?outbound.body.content_length(),
        "Forwarding request"
    );

    let response = match outbound.into_reqwest(&state.client).send().await {
        Ok(response) => response,
        Err(error) => {
            in_flight.disarm();
            return ProxyError::Upstream(error).into_response();
        }
    };

    tracing::debug!(status = %response.status(), "Upstream responded");

    forward::relay_response(response, in_flight)
}
