use axum::body::Body;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};

use llmgate_protocol::anthropic::error::ErrorResponse;
use llmgate_transform::error::GatewayError;

/// Render a request-scoped failure as a complete Anthropic error response.
pub fn error_response(error: &GatewayError, request_id: Option<String>) -> Response {
    let envelope = ErrorResponse::new(error.error_detail(), request_id);
    let body = serde_json::to_vec(&envelope).unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
