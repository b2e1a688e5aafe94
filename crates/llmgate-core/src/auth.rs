use http::HeaderMap;

use llmgate_transform::error::GatewayError;

/// Check the presented client token against the gateway's expected token.
/// Runs before any transcoding or upstream I/O.
pub fn authenticate(headers: &HeaderMap, expected_token: &str) -> Result<(), GatewayError> {
    let presented = extract_api_key(headers).ok_or_else(|| {
        GatewayError::Authentication("missing x-api-key or Authorization header".to_string())
    })?;
    if presented != expected_token {
        return Err(GatewayError::Authentication(
            "invalid authentication token".to_string(),
        ));
    }
    Ok(())
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(token) = auth.strip_prefix("bearer ") {
        return Some(token.trim().to_string());
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
