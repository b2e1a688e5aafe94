use llmgate_protocol::anthropic::response::MessageResponse;
use llmgate_protocol::anthropic::types::{
    ContentBlock, MessageRole, MessageType, StopReason, Usage,
};
use llmgate_protocol::openai::response::ChatCompletionResponse;
use llmgate_protocol::openai::types::{FinishReason, FinishReasonKnown};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::GatewayError;

/// finish_reason to stop_reason, exhaustive over the known vocabulary.
/// Unknown values and absence both map to end_turn.
const FINISH_REASON_TABLE: &[(FinishReasonKnown, StopReason)] = &[
    (FinishReasonKnown::Stop, StopReason::EndTurn),
    (FinishReasonKnown::Length, StopReason::MaxTokens),
    (FinishReasonKnown::ToolCalls, StopReason::ToolUse),
    (FinishReasonKnown::ContentFilter, StopReason::StopSequence),
];

pub fn map_finish_reason(reason: Option<&FinishReason>) -> StopReason {
    match reason {
        None => StopReason::EndTurn,
        Some(FinishReason::Known(known)) => FINISH_REASON_TABLE
            .iter()
            .find(|(from, _)| from == known)
            .map(|(_, to)| *to)
            .unwrap_or(StopReason::EndTurn),
        Some(FinishReason::Custom(value)) => {
            warn!(finish_reason = %value, "unrecognized upstream finish_reason");
            StopReason::EndTurn
        }
    }
}

/// Best-effort recovery of the matched stop string: Chat Completions does
/// not report which sequence fired, so the response tail is checked against
/// the request's stop_sequences. A stripped stop string is not recoverable.
pub fn match_stop_sequence<'a>(text: &str, stop_sequences: &'a [String]) -> Option<&'a str> {
    stop_sequences
        .iter()
        .find(|sequence| !sequence.is_empty() && text.ends_with(sequence.as_str()))
        .map(String::as_str)
}

/// Convert a complete Chat Completions response into an Anthropic message.
/// Only `choices[0]` is used; this surface returns exactly one candidate.
pub fn transform_response(
    response: &ChatCompletionResponse,
    client_model: &str,
    stop_sequences: &[String],
) -> Result<MessageResponse, GatewayError> {
    let choice = response.choices.first().ok_or_else(|| {
        GatewayError::UpstreamProtocol("upstream response carried no choices".to_string())
    })?;

    let text = choice.message.content.clone().unwrap_or_default();
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::Text { text: text.clone() });
    }
    if let Some(calls) = &choice.message.tool_calls {
        for call in calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: parse_tool_arguments(&call.function.arguments),
            });
        }
    }

    let mut stop_reason = map_finish_reason(choice.finish_reason.as_ref());
    let mut stop_sequence = None;
    if stop_reason == StopReason::EndTurn
        && let Some(matched) = match_stop_sequence(&text, stop_sequences)
    {
        stop_reason = StopReason::StopSequence;
        stop_sequence = Some(matched.to_string());
    }

    let usage = response
        .usage
        .map(|usage| Usage {
            input_tokens: usage.prompt_tokens.max(0) as u32,
            output_tokens: usage.completion_tokens.max(0) as u32,
        })
        .unwrap_or(Usage {
            input_tokens: 0,
            output_tokens: 0,
        });

    Ok(MessageResponse {
        id: response.id.clone(),
        r#type: MessageType::Message,
        role: MessageRole::Assistant,
        content,
        model: client_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence,
        usage,
    })
}

fn parse_tool_arguments(arguments: &str) -> JsonValue {
    match serde_json::from_str(arguments) {
        Ok(value) => value,
        Err(_) => {
            warn!("upstream tool-call arguments are not valid JSON; substituting empty object");
            JsonValue::Object(serde_json::Map::new())
        }
    }
}
