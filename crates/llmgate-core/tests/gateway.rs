use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::HeaderMap;
use http::header::HeaderValue;
use tokio::sync::mpsc;

use llmgate_core::config::{GatewayConfig, GatewaySnapshot, MemoryGatewayStore};
use llmgate_core::handler::{CoreState, handle_messages};
use llmgate_core::upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};
use llmgate_transform::error::{GatewayError, TransportErrorKind};
use llmgate_transform::model::ModelMap;

type Responder = Box<dyn Fn() -> UpstreamResponse + Send + Sync>;

struct StubUpstream {
    calls: AtomicUsize,
    respond: Responder,
}

impl StubUpstream {
    fn new(respond: Responder) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            respond,
        })
    }

    fn json(status: u16, body: &'static str) -> Arc<Self> {
        Self::new(Box::new(move || UpstreamResponse::Json {
            status,
            body: Bytes::from_static(body.as_bytes()),
        }))
    }

    fn stream(frames: Vec<Result<Bytes, GatewayError>>) -> Arc<Self> {
        Self::new(Box::new(move || {
            let (tx, rx) = mpsc::channel(64);
            for frame in &frames {
                let frame = match frame {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(err) => Err(err.clone()),
                };
                tx.try_send(frame).expect("stub channel overflow");
            }
            UpstreamResponse::Stream { chunks: rx }
        }))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UpstreamClient for StubUpstream {
    fn send<'a>(
        &'a self,
        _req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, GatewayError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = (self.respond)();
        Box::pin(async move { Ok(response) })
    }
}

fn state_with(upstream: Arc<StubUpstream>) -> Arc<CoreState> {
    let gateway = GatewayConfig {
        id: "gw1".to_string(),
        auth_token: "secret".to_string(),
        upstream_base_url: "http://upstream.test".to_string(),
        upstream_api_key: "sk-upstream".to_string(),
        models: ModelMap::new([("sonnet".to_string(), "gpt-test".to_string())]),
    };
    let store = MemoryGatewayStore::new(GatewaySnapshot::new([gateway]));
    Arc::new(CoreState {
        gateways: Arc::new(store),
        upstream,
    })
}

fn auth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("secret"));
    headers
}

fn request_body(model: &str, stream: bool) -> Bytes {
    Bytes::from(format!(
        r#"{{"model":"{model}","max_tokens":64,"stream":{stream},"messages":[{{"role":"user","content":"hi"}}]}}"#
    ))
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
}

fn sse_data(json: &str) -> Result<Bytes, GatewayError> {
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

fn assert_in_order(haystack: &str, needles: &[&str]) {
    let mut from = 0;
    for needle in needles {
        let at = haystack[from..]
            .find(needle)
            .unwrap_or_else(|| panic!("missing {needle:?} after offset {from} in:\n{haystack}"));
        from += at + needle.len();
    }
}

#[tokio::test]
async fn unknown_model_never_reaches_upstream() {
    let upstream = StubUpstream::json(200, "{}");
    let state = state_with(upstream.clone());

    let response = handle_messages(
        state,
        "gw1",
        &auth_headers(),
        request_body("ghost-model", false),
    )
    .await;
    assert_eq!(response.status(), 404);
    assert_eq!(upstream.calls(), 0);

    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn bad_token_is_denied_before_upstream() {
    let upstream = StubUpstream::json(200, "{}");
    let state = state_with(upstream.clone());

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("wrong"));
    let response = handle_messages(state.clone(), "gw1", &headers, request_body("sonnet", false))
        .await;
    assert_eq!(response.status(), 401);

    let response =
        handle_messages(state, "gw1", &HeaderMap::new(), request_body("sonnet", false)).await;
    assert_eq!(response.status(), 401);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn unknown_gateway_is_not_found() {
    let upstream = StubUpstream::json(200, "{}");
    let state = state_with(upstream.clone());

    let response =
        handle_messages(state, "nope", &auth_headers(), request_body("sonnet", false)).await;
    assert_eq!(response.status(), 404);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_invalid_request() {
    let upstream = StubUpstream::json(200, "{}");
    let state = state_with(upstream.clone());

    let response = handle_messages(
        state,
        "gw1",
        &auth_headers(),
        Bytes::from_static(b"{not json"),
    )
    .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn non_streaming_turn_round_trips() {
    let upstream = StubUpstream::json(
        200,
        r#"{"id":"chatcmpl-1","object":"chat.completion","created":1,"model":"gpt-test",
            "choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},
            "finish_reason":"stop"}],
            "usage":{"prompt_tokens":9,"completion_tokens":12,"total_tokens":21}}"#,
    );
    let state = state_with(upstream.clone());

    let response =
        handle_messages(state, "gw1", &auth_headers(), request_body("sonnet", false)).await;
    assert_eq!(response.status(), 200);
    assert_eq!(upstream.calls(), 1);

    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "sonnet");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello there");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["stop_sequence"], serde_json::Value::Null);
    assert_eq!(body["usage"]["input_tokens"], 9);
    assert_eq!(body["usage"]["output_tokens"], 12);
}

#[tokio::test]
async fn upstream_error_body_is_mapped() {
    let upstream = StubUpstream::json(
        429,
        r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#,
    );
    let state = state_with(upstream);

    let response =
        handle_messages(state, "gw1", &auth_headers(), request_body("sonnet", false)).await;
    assert_eq!(response.status(), 429);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "slow down");
}

#[tokio::test]
async fn streaming_turn_produces_the_event_grammar() {
    let upstream = StubUpstream::stream(vec![
        sse_data(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-test","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#,
        ),
        sse_data(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-test","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
        ),
        sse_data(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-test","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        ),
        sse_data(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-test","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#,
        ),
        Ok(Bytes::from_static(b"data: [DONE]\n\n")),
    ]);
    let state = state_with(upstream.clone());

    let response =
        handle_messages(state, "gw1", &auth_headers(), request_body("sonnet", true)).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert_in_order(
        &body,
        &[
            "event: message_start",
            "\"model\":\"sonnet\"",
            "event: content_block_start",
            "event: content_block_delta",
            "\"text\":\"Hel\"",
            "event: content_block_delta",
            "\"text\":\"lo\"",
            "event: content_block_stop",
            "event: message_delta",
            "\"stop_reason\":\"end_turn\"",
            "\"input_tokens\":10",
            "event: message_stop",
        ],
    );
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn midstream_disconnect_surfaces_an_error_event() {
    let upstream = StubUpstream::stream(vec![
        sse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"one"},"finish_reason":null}]}"#,
        ),
        sse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"two"},"finish_reason":null}]}"#,
        ),
        Err(GatewayError::UpstreamTransport {
            kind: TransportErrorKind::Reset,
            message: "connection reset by peer".to_string(),
        }),
    ]);
    let state = state_with(upstream);

    let response =
        handle_messages(state, "gw1", &auth_headers(), request_body("sonnet", true)).await;
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();

    assert_in_order(
        &body,
        &[
            "event: content_block_delta",
            "\"text\":\"one\"",
            "event: content_block_delta",
            "\"text\":\"two\"",
            "event: content_block_stop",
            "event: error",
            "\"type\":\"api_error\"",
        ],
    );
    assert!(!body.contains("message_stop"));
    // Transport detail never reaches the wire.
    assert!(!body.contains("connection reset by peer"));
}

#[tokio::test]
async fn truncated_stream_without_finish_reason_errors() {
    let upstream = StubUpstream::stream(vec![sse_data(
        r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"partial"},"finish_reason":null}]}"#,
    )]);
    let state = state_with(upstream);

    let response =
        handle_messages(state, "gw1", &auth_headers(), request_body("sonnet", true)).await;
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert_in_order(&body, &["event: content_block_stop", "event: error"]);
    assert!(!body.contains("message_stop"));
}
