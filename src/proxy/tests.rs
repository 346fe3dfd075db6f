// End-to-end proxy tests
//
// Each test runs an in-process upstream on 127.0.0.1:0 that echoes what it
// received as JSON, puts the proxy router in front of it, and drives the pair
// with reqwest.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use bytes::Bytes;
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::{router, ProxyState};
use crate::config::{Config, ModelMapping};

const SSE_CHUNKS: [&str; 3] = [
    "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
    "event: content_block_delta\ndata: {\"type\":\"content_block_delta\"}\n\n",
    "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
];

/// Set when the upstream's endless stream is dropped by hyper
static ENDLESS_STREAM_DROPPED: AtomicBool = AtomicBool::new(false);

struct DropFlag(&'static AtomicBool);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Harness
// ============================================================================

async fn echo(req: Request<Body>) -> Response<Body> {
    match req.uri().path() {
        "/stream" => {
            let chunks = futures::stream::unfold(0usize, |i| async move {
                if i == SSE_CHUNKS.len() {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from_static(SSE_CHUNKS[i].as_bytes())), i + 1))
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(chunks))
                .unwrap()
        }
        "/stream-error" => {
            // One event, then the backend dies mid-stream
            let chunks = futures::stream::unfold(0usize, |i| async move {
                match i {
                    0 => Some((Ok(Bytes::from_static(SSE_CHUNKS[0].as_bytes())), 1)),
                    1 => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Some((
                            Err(std::io::Error::new(
                                std::io::ErrorKind::BrokenPipe,
                                "backend crashed",
                            )),
                            2,
                        ))
                    }
                    _ => None,
                }
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(chunks))
                .unwrap()
        }
        "/stream-endless" => {
            let flag = DropFlag(&ENDLESS_STREAM_DROPPED);
            let chunks = futures::stream::unfold(flag, |flag| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from_static(b"data: ping\n\n")), flag))
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(chunks))
                .unwrap()
        }
        "/redirect" => Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, "/elsewhere")
            .body(Body::empty())
            .unwrap(),
        _ => {
            let (parts, body) = req.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            let headers: serde_json::Map<String, Value> = parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        Value::from(value.to_str().unwrap_or_default()),
                    )
                })
                .collect();
            let echoed = json!({
                "method": parts.method.as_str(),
                "path": parts.uri.path(),
                "query": parts.uri.query(),
                "headers": headers,
                "body": String::from_utf8_lossy(&body),
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(echoed.to_string()))
                .unwrap()
        }
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

fn config(upstream: &str, mappings: &[(&str, &str)]) -> Config {
    Config {
        upstream: Url::parse(upstream).unwrap(),
        model_mappings: mappings
            .iter()
            .map(|(from, to)| ModelMapping::new(*from, *to))
            .collect(),
        ..Config::default()
    }
}

/// Start an echo upstream and a proxy in front of it; returns the proxy address
async fn start_pair(mappings: &[(&str, &str)]) -> SocketAddr {
    let upstream = serve(Router::new().fallback(echo)).await;
    start_proxy_for(config(&format!("http://{}", upstream), mappings)).await
}

async fn start_proxy_for(config: Config) -> SocketAddr {
    let state = ProxyState::from_config(&config).unwrap();
    serve(router(state)).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn post(proxy: SocketAddr, path: &str, body: &'static str) -> Value {
    client()
        .post(format!("http://{}{}", proxy, path))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ============================================================================
// Rewrites
// ============================================================================

#[tokio::test]
async fn test_web_search_is_forced_onto_free_tier() {
    let proxy = start_pair(&[]).await;

    let echoed = post(
        proxy,
        "/api/internal?webSearch2",
        r#"{"isFreeTierRequest": false, "query": "rust"}"#,
    )
    .await;

    let expected = r#"{"isFreeTierRequest":true, "query": "rust"}"#;
    assert_eq!(echoed["body"], expected);
    assert_eq!(echoed["path"], "/api/internal");
    assert_eq!(echoed["query"], "webSearch2");
    assert_eq!(echoed["headers"]["content-length"], expected.len().to_string());
    assert!(echoed["headers"].get("x-amp-mode").is_none());
}

#[tokio::test]
async fn test_extract_web_page_content_is_forced_onto_free_tier() {
    let proxy = start_pair(&[]).await;

    let echoed = post(
        proxy,
        "/api/internal?extractWebPageContent",
        r#"{"url":"https://example.com","isFreeTierRequest":false}"#,
    )
    .await;

    assert_eq!(
        echoed["body"],
        r#"{"url":"https://example.com","isFreeTierRequest":true}"#
    );
}

#[tokio::test]
async fn test_other_internal_operations_are_untouched() {
    let proxy = start_pair(&[]).await;
    let body = r#"{"isFreeTierRequest":false}"#;

    let echoed = post(proxy, "/api/internal?getUserInfo", body).await;

    assert_eq!(echoed["body"], body);
    assert_eq!(echoed["headers"]["content-length"], body.len().to_string());
}

#[tokio::test]
async fn test_model_mapping_rewrites_and_marks_free_mode() {
    let proxy = start_pair(&[("claude-opus-4", "claude-sonnet-4"), ("claude-sonnet-4", "x")]).await;

    let echoed = post(
        proxy,
        "/api/provider/anthropic/v1/messages",
        r#"{"model": "claude-opus-4","max_tokens":1024,"stream":true}"#,
    )
    .await;

    let expected = r#"{"model":"claude-sonnet-4","max_tokens":1024,"stream":true}"#;
    assert_eq!(echoed["body"], expected);
    assert_eq!(echoed["headers"]["x-amp-mode"], "free");
    assert_eq!(echoed["headers"]["content-length"], expected.len().to_string());
}

#[tokio::test]
async fn test_mapping_target_is_inserted_literally() {
    let proxy = start_pair(&[("a", r#"$1 "quoted""#)]).await;

    let echoed = post(proxy, "/api/provider/anthropic/v1/messages", r#"{"model":"a"}"#).await;

    let body: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["model"], r#"$1 "quoted""#);
}

#[tokio::test]
async fn test_unmapped_model_passes_through_without_amp_mode() {
    let proxy = start_pair(&[("claude-opus-4", "claude-sonnet-4")]).await;
    let body = r#"{"model":"claude-haiku-4"}"#;

    let echoed = post(proxy, "/api/provider/anthropic/v1/messages", body).await;

    assert_eq!(echoed["body"], body);
    assert!(echoed["headers"].get("x-amp-mode").is_none());
}

#[tokio::test]
async fn test_disabled_rewrites_forward_unchanged() {
    let upstream = serve(Router::new().fallback(echo)).await;
    let mut cfg = config(&format!("http://{}", upstream), &[("a", "b")]);
    cfg.enable_free_search = false;
    cfg.enable_model_mapping = false;
    let proxy = start_proxy_for(cfg).await;

    let search = r#"{"isFreeTierRequest":false}"#;
    let echoed = post(proxy, "/api/internal?webSearch2", search).await;
    assert_eq!(echoed["body"], search);

    let messages = r#"{"model":"a"}"#;
    let echoed = post(proxy, "/api/provider/anthropic/v1/messages", messages).await;
    assert_eq!(echoed["body"], messages);
    assert!(echoed["headers"].get("x-amp-mode").is_none());
}

#[tokio::test]
async fn test_concurrent_requests_do_not_interfere() {
    let proxy = start_pair(&[("a", "b")]).await;

    let requests: Vec<_> = (0..20)
        .map(|i| {
            tokio::spawn(async move {
                let echoed = if i % 2 == 0 {
                    post(proxy, "/api/provider/anthropic/v1/messages", r#"{"model":"a"}"#).await
                } else {
                    post(proxy, "/api/internal?webSearch2", r#"{"isFreeTierRequest":false}"#).await
                };
                (i, echoed)
            })
        })
        .collect();

    for request in requests {
        let (i, echoed) = request.await.unwrap();
        if i % 2 == 0 {
            assert_eq!(echoed["body"], r#"{"model":"b"}"#);
            assert_eq!(echoed["headers"]["x-amp-mode"], "free");
        } else {
            assert_eq!(echoed["body"], r#"{"isFreeTierRequest":true}"#);
            assert!(echoed["headers"].get("x-amp-mode").is_none());
        }
    }
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_get_forwards_path_query_and_proxy_headers() {
    let proxy = start_pair(&[]).await;

    let echoed: Value = client()
        .get(format!("http://{}/api/threads?limit=5&offset=10", proxy))
        .header(header::AUTHORIZATION, "Bearer token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["path"], "/api/threads");
    assert_eq!(echoed["query"], "limit=5&offset=10");
    assert_eq!(echoed["body"], "");
    assert_eq!(echoed["headers"]["authorization"], "Bearer token");
    assert_eq!(echoed["headers"]["x-forwarded-host"], proxy.to_string());
    assert_eq!(echoed["headers"]["x-forwarded-proto"], "http");
    assert_eq!(echoed["headers"]["x-forwarded-for"], "127.0.0.1");
    assert_ne!(echoed["headers"]["host"], proxy.to_string());
}

#[tokio::test]
async fn test_upstream_path_prefix_is_joined() {
    let upstream = serve(Router::new().fallback(echo)).await;
    let proxy = start_proxy_for(config(&format!("http://{}/prefix/", upstream), &[])).await;

    let echoed = post(proxy, "/v1/messages", "{}").await;

    assert_eq!(echoed["path"], "/prefix/v1/messages");
}

#[tokio::test]
async fn test_streaming_response_is_relayed() {
    let proxy = start_pair(&[]).await;

    let mut response = client()
        .get(format!("http://{}/stream", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut received = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(String::from_utf8(received).unwrap(), SSE_CHUNKS.concat());
}

#[tokio::test]
async fn test_upstream_failure_mid_stream_aborts_client_stream() {
    let proxy = start_pair(&[]).await;

    let mut response = client()
        .get(format!("http://{}/stream-error", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let first = response.chunk().await.unwrap().unwrap();
    assert_eq!(first, SSE_CHUNKS[0]);

    // The truncated upstream body surfaces as a body error, not a clean end
    let mut rest = Ok(Some(Bytes::new()));
    while let Ok(Some(_)) = rest {
        rest = response.chunk().await;
    }
    assert!(rest.is_err());
}

#[tokio::test]
async fn test_client_hang_up_mid_stream_is_not_fatal() {
    let proxy = start_pair(&[]).await;

    let mut response = client()
        .get(format!("http://{}/stream-endless", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.chunk().await.unwrap().unwrap(), "data: ping\n\n");
    drop(response);

    // The hang-up reaches the upstream: its stream gets dropped
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !ENDLESS_STREAM_DROPPED.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "upstream stream still running after client hang-up"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // And the proxy keeps serving
    let echoed = post(proxy, "/api/internal?webSearch2", r#"{"isFreeTierRequest":false}"#).await;
    assert_eq!(echoed["body"], r#"{"isFreeTierRequest":true}"#);
}

#[tokio::test]
async fn test_head_request_is_relayed() {
    let proxy = start_pair(&[]).await;

    let response = client()
        .head(format!("http://{}/api/threads", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redirects_are_returned_to_the_client() {
    let proxy = start_pair(&[]).await;

    let response = client()
        .get(format!("http://{}/redirect", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/elsewhere");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Grab a free port, then close it so nothing is listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let proxy = start_proxy_for(config(&format!("http://{}", dead), &[])).await;

    let response = client()
        .get(format!("http://{}/api/threads", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
