use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::post;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use llmgate_protocol::anthropic::request::CreateMessageRequestBody;
use llmgate_protocol::anthropic::response::MessageResponse;
use llmgate_protocol::openai::response::ChatCompletionResponse;
use llmgate_transform::error::{GatewayError, map_upstream_error};
use llmgate_transform::request::transform_request;
use llmgate_transform::response::transform_response;
use llmgate_transform::stream::StreamTranscoder;

use crate::auth;
use crate::config::GatewayStore;
use crate::error::error_response;
use crate::stream_driver;
use crate::upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};

const REQUEST_ID_HEADER: &str = "x-llmgate-request-id";

pub struct CoreState {
    pub gateways: Arc<dyn GatewayStore>,
    pub upstream: Arc<dyn UpstreamClient>,
}

pub fn router(state: Arc<CoreState>) -> Router {
    Router::new()
        .route("/gateway/{gateway_id}/v1/messages", post(messages_handler))
        .with_state(state)
}

async fn messages_handler(
    State(state): State<Arc<CoreState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_messages(state, &gateway_id, &headers, body).await
}

/// Full request path: lookup, auth, validate, transcode, dispatch, transcode
/// back. Failures here happen before any response bytes are written and
/// surface as complete error responses.
pub async fn handle_messages(
    state: Arc<CoreState>,
    gateway_id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    match serve_messages(&state, gateway_id, headers, body, &trace_id).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                event = "request_failed",
                trace_id = %trace_id,
                gateway = %gateway_id,
                status = err.http_status(),
                error = %err,
            );
            error_response(&err, Some(trace_id))
        }
    }
}

async fn serve_messages(
    state: &CoreState,
    gateway_id: &str,
    headers: &HeaderMap,
    body: Bytes,
    trace_id: &str,
) -> Result<Response, GatewayError> {
    let started_at = Instant::now();

    let gateway = state
        .gateways
        .lookup(gateway_id)
        .ok_or_else(|| GatewayError::UnknownGateway(gateway_id.to_string()))?;
    auth::authenticate(headers, &gateway.auth_token)?;

    let request: CreateMessageRequestBody = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::Validation(format!("invalid request body: {err}")))?;
    if request.model.is_empty() {
        return Err(GatewayError::Validation(
            "missing required parameter: model".to_string(),
        ));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::Validation(
            "messages must not be empty".to_string(),
        ));
    }

    let upstream_model = gateway.models.resolve(&request.model)?.to_string();
    let upstream_body = transform_request(&request, &upstream_model)?;
    let is_stream = request.stream.unwrap_or(false);

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        gateway = %gateway_id,
        model = %request.model,
        upstream_model = %upstream_model,
        is_stream,
    );

    let response = state
        .upstream
        .send(UpstreamRequest {
            base_url: gateway.upstream_base_url.clone(),
            api_key: gateway.upstream_api_key.clone(),
            body: upstream_body,
            stream: is_stream,
        })
        .await?;

    match response {
        UpstreamResponse::Json { status, body } => {
            if !(200..300).contains(&status) {
                return Err(map_upstream_error(status, &body));
            }
            if is_stream {
                return Err(GatewayError::UpstreamProtocol(
                    "upstream returned a non-streaming response to a streaming request"
                        .to_string(),
                ));
            }

            let upstream: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|err| {
                GatewayError::UpstreamProtocol(format!("could not parse upstream response: {err}"))
            })?;
            let stops = request.stop_sequences.clone().unwrap_or_default();
            let message = transform_response(&upstream, &request.model, &stops)?;

            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                gateway = %gateway_id,
                status = 200u16,
                input_tokens = message.usage.input_tokens,
                output_tokens = message.usage.output_tokens,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = false,
            );
            Ok(json_response(&message, trace_id))
        }
        UpstreamResponse::Stream { chunks } => {
            if !is_stream {
                return Err(GatewayError::UpstreamProtocol(
                    "upstream streamed a non-streaming request".to_string(),
                ));
            }

            let stops = request.stop_sequences.clone().unwrap_or_default();
            let machine = StreamTranscoder::new(request.model.clone(), stops);
            let (events_tx, events_rx) = mpsc::channel::<Bytes>(16);
            tokio::spawn(stream_driver::pump(
                machine,
                chunks,
                events_tx,
                trace_id.to_string(),
            ));

            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                gateway = %gateway_id,
                status = 200u16,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = true,
            );
            Ok(sse_response(events_rx, trace_id))
        }
    }
}

fn json_response(message: &MessageResponse, trace_id: &str) -> Response {
    let body = serde_json::to_vec(message).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    set_request_id(&mut response, trace_id);
    response
}

fn sse_response(mut events: mpsc::Receiver<Bytes>, trace_id: &str) -> Response {
    let stream = futures_util::stream::poll_fn(move |cx| events.poll_recv(cx))
        .map(Ok::<Bytes, std::convert::Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    set_request_id(&mut response, trace_id);
    response
}

fn set_request_id(response: &mut Response, trace_id: &str) {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
}
