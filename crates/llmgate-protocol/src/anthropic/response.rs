use serde::{Deserialize, Serialize};

use crate::anthropic::types::{ContentBlock, MessageRole, MessageType, StopReason, Usage};

/// A complete assistant turn. `stop_reason` and `stop_sequence` serialize as
/// explicit nulls; clients distinguish null from absent here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: MessageType,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}
