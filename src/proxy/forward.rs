//! Outbound request construction and response relaying
//!
//! This is the generic reverse-proxy half: it turns the inbound request into an
//! [`OutboundRequest`] aimed at the upstream (target URL, `Host`,
//! `X-Forwarded-*`, hop-by-hop headers) and turns the upstream response back
//! into a streaming axum response. Body rewriting happens in between, in
//! [`super::hook`].

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response},
};
use bytes::Bytes;
use reqwest::Url;
use std::net::SocketAddr;

use super::relay::{InFlight, RelayStream};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

// ============================================================================
// Outbound Request
// ============================================================================

/// Request body on its way upstream
pub enum OutboundBody {
    /// The client's body stream, forwarded as it arrives
    Streaming(Body),
    /// Fully read into memory; its length is exact
    Buffered(Bytes),
}

impl OutboundBody {
    /// Exact length when known
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Streaming(_) => None,
            Self::Buffered(bytes) => Some(bytes.len() as u64),
        }
    }
}

/// A request about to be sent upstream
pub struct OutboundRequest {
    pub method: Method,
    /// Fully resolved upstream URL
    pub url: Url,
    /// Path as the client sent it
    pub path: String,
    /// Raw query string as the client sent it
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: OutboundBody,
    /// Whether the client's framing announced a body
    pub has_body: bool,
}

impl OutboundRequest {
    /// Rewrite the standard proxy fields of an inbound request
    pub fn from_inbound(req: Request<Body>, upstream: &Url, client: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();
        let query = parts.uri.query().map(String::from);
        let url = upstream_url(upstream, &path, query.as_deref());

        let mut headers = parts.headers;
        // Decided before Transfer-Encoding is stripped below
        let has_body = declares_body(&headers);
        strip_hop_by_hop(&mut headers);

        // The HTTP client derives Host from the upstream URL
        let original_host = headers.remove(header::HOST);
        if let Some(host) = original_host {
            if !headers.contains_key(X_FORWARDED_HOST) {
                headers.insert(X_FORWARDED_HOST, host);
            }
        }
        if !headers.contains_key(X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        }
        if let Some(addr) = client {
            append_forwarded_for(&mut headers, addr);
        }

        Self {
            method: parts.method,
            url,
            path,
            query,
            headers,
            body: OutboundBody::Streaming(body),
            has_body,
        }
    }

    /// Replace the body with fully buffered bytes and make every length
    /// header agree with them
    pub fn set_buffered(&mut self, bytes: Bytes) {
        self.headers.remove(header::TRANSFER_ENCODING);
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        self.body = OutboundBody::Buffered(bytes);
    }

    /// Take the body out, leaving an empty buffered one in its place
    pub fn take_body(&mut self) -> OutboundBody {
        std::mem::replace(&mut self.body, OutboundBody::Buffered(Bytes::new()))
    }

    /// Build the upstream request
    pub fn into_reqwest(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method, self.url)
            .headers(self.headers);

        match self.body {
            OutboundBody::Buffered(bytes) => builder.body(bytes),
            OutboundBody::Streaming(body) if self.has_body => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
            // Sending an empty stream would turn a GET into a chunked upload
            OutboundBody::Streaming(_) => builder,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Turn an upstream response into a streaming client response
pub fn relay_response(response: reqwest::Response, mut in_flight: InFlight) -> Response<Body> {
    let status = response.status();
    in_flight.settle_bodyless(status);
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let body = Body::from_stream(RelayStream::new(response.bytes_stream(), in_flight));

    let mut relayed = Response::new(body);
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}

// ============================================================================
// Helpers
// ============================================================================

/// Whether the request framing announces a body
///
/// A request with neither `Content-Length` nor `Transfer-Encoding` has no
/// body in HTTP/1.1; neither does one declaring `Content-Length: 0`.
pub fn declares_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    match headers.get(header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|len| len > 0)
            .unwrap_or(true),
        None => false,
    }
}

/// Join the upstream base URL with the request path and query
///
/// Paths are joined with exactly one slash between them; the base URL's query
/// (if any) comes first.
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    url.set_path(&join_paths(base.path(), path));

    let base_query = base.query().filter(|q| !q.is_empty());
    let query = query.filter(|q| !q.is_empty());
    let merged = match (base_query, query) {
        (Some(a), Some(b)) => Some(format!("{}&{}", a, b)),
        (a, b) => a.or(b).map(String::from),
    };
    url.set_query(merged.as_deref());
    url
}

fn join_paths(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the client IP to `X-Forwarded-For`, keeping earlier hops
fn append_forwarded_for(headers: &mut HeaderMap, client: SocketAddr) {
    let ip = client.ip().to_string();
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

// ============================================================================
// Tests
// ============================================================================
