use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Best-effort model of an upstream error body; every field is optional
/// because upstream implementations disagree on the shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamErrorBody {
    pub error: UpstreamErrorDetail,
}
