use llmgate_protocol::anthropic::request::CreateMessageRequestBody;
use llmgate_protocol::anthropic::types::{
    ContentBlock, MessageContent, MessageParam, MessageRole, SystemParam, Tool, ToolChoice,
    ToolResultBlock, ToolResultContent,
};
use llmgate_protocol::openai::request::ChatCompletionRequestBody;
use llmgate_protocol::openai::types::{
    AssistantMessage, ChatMessage, FunctionCall, FunctionObject, NamedToolChoice,
    NamedToolChoiceFunction, StopConfiguration, StreamOptions, SystemMessage, ToolCall,
    ToolCallType, ToolChoiceMode, ToolChoiceOption, ToolDefinition, ToolMessage, UserContent,
    UserMessage,
};

use crate::error::GatewayError;

/// Convert an Anthropic create-message request into a Chat Completions
/// request targeting the already-resolved upstream model.
pub fn transform_request(
    body: &CreateMessageRequestBody,
    upstream_model: &str,
) -> Result<ChatCompletionRequestBody, GatewayError> {
    let mut messages = Vec::new();
    if let Some(system) = map_system(body.system.as_ref()) {
        messages.push(system);
    }
    for message in &body.messages {
        map_message(message, &mut messages)?;
    }

    let stream = body.stream;
    // Without include_usage most upstreams omit stream usage entirely and the
    // terminal message_delta would always report zeros.
    let stream_options = matches!(stream, Some(true)).then_some(StreamOptions {
        include_usage: Some(true),
    });
    let (tool_choice, parallel_tool_calls) = map_tool_choice(body.tool_choice.as_ref());

    Ok(ChatCompletionRequestBody {
        messages,
        model: upstream_model.to_string(),
        max_tokens: Some(body.max_tokens),
        temperature: body.temperature,
        top_p: body.top_p,
        // top_k has no Chat Completions equivalent and is dropped.
        stop: map_stop_sequences(body.stop_sequences.as_deref()),
        stream,
        stream_options,
        tools: map_tools(body.tools.as_deref())?,
        tool_choice,
        parallel_tool_calls,
    })
}

fn map_system(system: Option<&SystemParam>) -> Option<ChatMessage> {
    let text = match system? {
        SystemParam::Text(text) => text.clone(),
        // Segments concatenate in order; no separators are added.
        SystemParam::Blocks(blocks) => blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<String>(),
    };
    if text.is_empty() {
        return None;
    }
    Some(ChatMessage::System(SystemMessage { content: text }))
}

fn map_message(
    message: &MessageParam,
    output: &mut Vec<ChatMessage>,
) -> Result<(), GatewayError> {
    match message.role {
        MessageRole::User => map_user_message(&message.content, output),
        MessageRole::Assistant => map_assistant_message(&message.content, output),
    }
}

fn map_user_message(
    content: &MessageContent,
    output: &mut Vec<ChatMessage>,
) -> Result<(), GatewayError> {
    let mut text = String::new();

    match content {
        MessageContent::Text(value) => text.push_str(value),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text: value } => text.push_str(value),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        flush_user_text(&mut text, output);
                        output.push(ChatMessage::Tool(ToolMessage {
                            content: tool_result_text(content.as_ref()),
                            tool_call_id: tool_use_id.clone(),
                        }));
                    }
                    ContentBlock::ToolUse { .. } => {
                        return Err(GatewayError::Validation(
                            "tool_use blocks are only valid on assistant messages".to_string(),
                        ));
                    }
                }
            }
        }
    }

    flush_user_text(&mut text, output);
    Ok(())
}

fn flush_user_text(text: &mut String, output: &mut Vec<ChatMessage>) {
    if text.is_empty() {
        return;
    }
    output.push(ChatMessage::User(UserMessage {
        content: UserContent::Text(std::mem::take(text)),
    }));
}

fn map_assistant_message(
    content: &MessageContent,
    output: &mut Vec<ChatMessage>,
) -> Result<(), GatewayError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    match content {
        MessageContent::Text(value) => text.push_str(value),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text: value } => text.push_str(value),
                    ContentBlock::ToolUse { id, name, input } => {
                        let arguments =
                            serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string());
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            r#type: ToolCallType::Function,
                            function: FunctionCall {
                                name: name.clone(),
                                arguments,
                            },
                        });
                    }
                    ContentBlock::ToolResult { .. } => {
                        return Err(GatewayError::Validation(
                            "tool_result blocks are only valid on user messages".to_string(),
                        ));
                    }
                }
            }
        }
    }

    output.push(ChatMessage::Assistant(AssistantMessage {
        content: (!text.is_empty()).then_some(text),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    }));
    Ok(())
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|ToolResultBlock::Text { text }| text.as_str())
            .collect::<Vec<&str>>()
            .join("\n"),
        None => String::new(),
    }
}

fn map_tools(tools: Option<&[Tool]>) -> Result<Option<Vec<ToolDefinition>>, GatewayError> {
    let Some(tools) = tools else {
        return Ok(None);
    };

    let mut definitions = Vec::new();
    for tool in tools {
        match tool.r#type.as_deref() {
            None | Some("custom") => definitions.push(ToolDefinition::Function {
                function: FunctionObject {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                    strict: None,
                },
            }),
            Some(other) => {
                // Builtin tools must not degrade silently, unlike top_k.
                return Err(GatewayError::UnsupportedFeature(format!(
                    "tool type {other:?} has no chat-completions equivalent"
                )));
            }
        }
    }

    Ok((!definitions.is_empty()).then_some(definitions))
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> (Option<ToolChoiceOption>, Option<bool>) {
    let parallel = |disabled: &Option<bool>| disabled.map(|disabled| !disabled);

    match choice {
        None => (None, None),
        Some(ToolChoice::Auto {
            disable_parallel_tool_use,
        }) => (
            Some(ToolChoiceOption::Mode(ToolChoiceMode::Auto)),
            parallel(disable_parallel_tool_use),
        ),
        Some(ToolChoice::Any {
            disable_parallel_tool_use,
        }) => (
            Some(ToolChoiceOption::Mode(ToolChoiceMode::Required)),
            parallel(disable_parallel_tool_use),
        ),
        Some(ToolChoice::Tool {
            name,
            disable_parallel_tool_use,
        }) => (
            Some(ToolChoiceOption::Named(NamedToolChoice {
                r#type: ToolCallType::Function,
                function: NamedToolChoiceFunction { name: name.clone() },
            })),
            parallel(disable_parallel_tool_use),
        ),
        Some(ToolChoice::None) => (Some(ToolChoiceOption::Mode(ToolChoiceMode::None)), None),
    }
}

fn map_stop_sequences(stop_sequences: Option<&[String]>) -> Option<StopConfiguration> {
    let sequences = stop_sequences?;
    match sequences {
        [] => None,
        [single] => Some(StopConfiguration::Single(single.clone())),
        many => Some(StopConfiguration::Many(many.to_vec())),
    }
}
