use llmgate_protocol::anthropic::error::{ErrorDetail, ErrorType, ErrorTypeKnown};
use llmgate_protocol::openai::error::UpstreamErrorBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Reset,
    Other,
}

/// Request-scoped failure taxonomy. Every variant maps to a wire error type
/// and HTTP status through the tables below.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    #[error("gateway not found: {0}")]
    UnknownGateway(String),
    #[error("model not found: {0}")]
    UnknownModel(String),
    #[error("{0}")]
    UnsupportedFeature(String),
    #[error("{0}")]
    Authentication(String),
    /// `message` holds transport detail for logs; the wire message stays
    /// generic and never carries upstream detail.
    #[error("upstream transport failure: {message}")]
    UpstreamTransport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("{0}")]
    UpstreamProtocol(String),
    #[error("{0}")]
    StreamAbort(String),
    /// Upstream 4xx/5xx with a recognized structured body, mapped
    /// field-by-field.
    #[error("upstream returned HTTP {status}: {message}")]
    Upstream {
        status: u16,
        error_type: ErrorTypeKnown,
        message: String,
    },
}

/// Wire error type per taxonomy variant.
const ERROR_TYPE_TABLE: &[(&str, ErrorTypeKnown)] = &[
    ("validation", ErrorTypeKnown::InvalidRequestError),
    ("unknown_gateway", ErrorTypeKnown::NotFoundError),
    ("unknown_model", ErrorTypeKnown::NotFoundError),
    ("unsupported_feature", ErrorTypeKnown::InvalidRequestError),
    ("authentication", ErrorTypeKnown::AuthenticationError),
    ("upstream_transport", ErrorTypeKnown::ApiError),
    ("upstream_protocol", ErrorTypeKnown::ApiError),
    ("stream_abort", ErrorTypeKnown::ApiError),
];

/// Upstream HTTP status to wire error type; anything else is api_error.
const UPSTREAM_STATUS_TABLE: &[(u16, ErrorTypeKnown)] = &[
    (400, ErrorTypeKnown::InvalidRequestError),
    (401, ErrorTypeKnown::AuthenticationError),
    (403, ErrorTypeKnown::PermissionError),
    (404, ErrorTypeKnown::NotFoundError),
    (413, ErrorTypeKnown::RequestTooLarge),
    (429, ErrorTypeKnown::RateLimitError),
    (529, ErrorTypeKnown::OverloadedError),
];

/// Recognized upstream error-body `type` strings.
const UPSTREAM_TYPE_TABLE: &[(&str, ErrorTypeKnown)] = &[
    ("invalid_request_error", ErrorTypeKnown::InvalidRequestError),
    ("authentication_error", ErrorTypeKnown::AuthenticationError),
    ("permission_error", ErrorTypeKnown::PermissionError),
    ("not_found_error", ErrorTypeKnown::NotFoundError),
    ("rate_limit_error", ErrorTypeKnown::RateLimitError),
    ("rate_limit_exceeded", ErrorTypeKnown::RateLimitError),
    ("insufficient_quota", ErrorTypeKnown::RateLimitError),
    ("overloaded_error", ErrorTypeKnown::OverloadedError),
];

impl GatewayError {
    fn kind_key(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::UnknownGateway(_) => "unknown_gateway",
            GatewayError::UnknownModel(_) => "unknown_model",
            GatewayError::UnsupportedFeature(_) => "unsupported_feature",
            GatewayError::Authentication(_) => "authentication",
            GatewayError::UpstreamTransport { .. } => "upstream_transport",
            GatewayError::UpstreamProtocol(_) => "upstream_protocol",
            GatewayError::StreamAbort(_) => "stream_abort",
            GatewayError::Upstream { .. } => "upstream",
        }
    }

    pub fn error_type(&self) -> ErrorTypeKnown {
        if let GatewayError::Upstream { error_type, .. } = self {
            return *error_type;
        }
        let key = self.kind_key();
        ERROR_TYPE_TABLE
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, error_type)| *error_type)
            .unwrap_or(ErrorTypeKnown::ApiError)
    }

    pub fn http_status(&self) -> u16 {
        self.error_type().http_status()
    }

    /// The message written to the wire. Transport detail is replaced by a
    /// generic message; it is logged, not forwarded.
    pub fn wire_message(&self) -> String {
        match self {
            GatewayError::UpstreamTransport { .. } => {
                "could not reach the upstream provider".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn error_detail(&self) -> ErrorDetail {
        ErrorDetail {
            r#type: ErrorType::Known(self.error_type()),
            message: self.wire_message(),
        }
    }
}

/// Map an upstream non-2xx response to the taxonomy. A recognized `type`
/// string wins; otherwise the status decides; the upstream `message` is
/// carried when present, and a generic one substitutes when the body is
/// unrecognized.
pub fn map_upstream_error(status: u16, body: &[u8]) -> GatewayError {
    let parsed = serde_json::from_slice::<UpstreamErrorBody>(body).ok();
    let detail = parsed.map(|body| body.error);

    let by_type = detail
        .as_ref()
        .and_then(|detail| detail.r#type.as_deref())
        .and_then(|name| {
            UPSTREAM_TYPE_TABLE
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, error_type)| *error_type)
        });
    let by_status = UPSTREAM_STATUS_TABLE
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, error_type)| *error_type);

    let error_type = by_type.or(by_status).unwrap_or(ErrorTypeKnown::ApiError);
    let message = detail
        .and_then(|detail| detail.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("upstream returned HTTP {status}"));

    GatewayError::Upstream {
        status,
        error_type,
        message,
    }
}
