use std::collections::BTreeMap;

use llmgate_protocol::anthropic::error::{ErrorDetail, ErrorType, ErrorTypeKnown};
use llmgate_protocol::anthropic::stream::{
    ContentBlockDelta, MessageDeltaBody, StreamContentBlock, StreamEvent, StreamMessage,
    StreamUsage,
};
use llmgate_protocol::anthropic::types::{MessageRole, MessageType, StopReason};
use llmgate_protocol::openai::stream::ChatCompletionChunk;
use llmgate_protocol::openai::types::{CompletionUsage, ToolCallChunk};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::response::{map_finish_reason, match_stop_sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Streaming,
    /// finish_reason seen, open blocks closed; awaiting final usage (the
    /// include_usage shape puts it on a trailing choices-less chunk) or end
    /// of stream.
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct ToolBlock {
    block_index: u32,
}

/// Per-request state machine converting Chat Completions chunks, in arrival
/// order, into the ordered Anthropic stream event grammar. Pure: the caller
/// owns transport, timeouts, and ping cadence.
#[derive(Debug)]
pub struct StreamTranscoder {
    model: String,
    stop_sequences: Vec<String>,
    phase: Phase,
    next_block_index: u32,
    text_block: Option<u32>,
    /// Open tool blocks keyed by the upstream tool-call index.
    tool_blocks: BTreeMap<i64, ToolBlock>,
    /// Latest non-null usage seen on any chunk.
    usage: Option<CompletionUsage>,
    pending_stop: Option<StopReason>,
    /// Tail of emitted text, bounded by the longest stop sequence.
    text_tail: String,
    tail_limit: usize,
}

impl StreamTranscoder {
    pub fn new(model: impl Into<String>, stop_sequences: Vec<String>) -> Self {
        let tail_limit = stop_sequences
            .iter()
            .map(String::len)
            .max()
            .unwrap_or_default();
        Self {
            model: model.into(),
            stop_sequences,
            phase: Phase::NotStarted,
            next_block_index: 0,
            text_block: None,
            tool_blocks: BTreeMap::new(),
            usage: None,
            pending_stop: None,
            text_tail: String::new(),
            tail_limit,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed)
    }

    /// Whether message_start has been emitted, i.e. whether a failure must
    /// now be reported in-stream.
    pub fn is_started(&self) -> bool {
        !matches!(self.phase, Phase::NotStarted)
    }

    pub fn on_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        match self.phase {
            Phase::Done | Phase::Failed => {
                warn!(chunk_id = %chunk.id, "chunk received after stream end; dropped");
                return Vec::new();
            }
            Phase::Finalizing => return self.on_finalizing_chunk(chunk),
            Phase::NotStarted | Phase::Streaming => {}
        }

        let mut events = Vec::new();
        if self.phase == Phase::NotStarted {
            events.push(self.message_start(chunk));
            self.phase = Phase::Streaming;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let choice = chunk.choices.first();
        if let Some(choice) = choice {
            if let Some(text) = choice.delta.content.as_deref() {
                self.emit_text(text, &mut events);
            }
            if let Some(refusal) = choice.delta.refusal.as_deref() {
                self.emit_text(refusal, &mut events);
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    self.emit_tool_call(call, &mut events);
                }
            }
        }

        if let Some(reason) = choice.and_then(|choice| choice.finish_reason.as_ref()) {
            self.pending_stop = Some(map_finish_reason(Some(reason)));
            self.close_open_blocks(&mut events);
            self.phase = Phase::Finalizing;
            if self.usage.is_some() {
                self.finalize(&mut events);
            }
        }

        events
    }

    /// Upstream signalled normal end of stream (`[DONE]` or a clean close).
    pub fn on_stream_end(&mut self) -> Vec<StreamEvent> {
        match self.phase {
            Phase::Finalizing => {
                let mut events = Vec::new();
                self.finalize(&mut events);
                events
            }
            Phase::Done | Phase::Failed => Vec::new(),
            // Ended without a finish_reason: the turn never completed.
            Phase::NotStarted | Phase::Streaming => self.on_failure(ErrorDetail {
                r#type: ErrorType::Known(ErrorTypeKnown::ApiError),
                message: "upstream stream ended before completion".to_string(),
            }),
        }
    }

    /// Transport failure or explicit upstream error mid-stream: close open
    /// blocks, surface the error, never emit message_stop afterwards.
    pub fn on_failure(&mut self, error: ErrorDetail) -> Vec<StreamEvent> {
        if self.is_done() {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.close_open_blocks(&mut events);
        events.push(StreamEvent::Error { error });
        self.phase = Phase::Failed;
        events
    }

    fn on_finalizing_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let has_content = chunk.choices.first().is_some_and(|choice| {
            choice.delta.content.is_some() || choice.delta.tool_calls.is_some()
        });
        if has_content {
            warn!(chunk_id = %chunk.id, "content after finish_reason; dropped");
        }

        let mut events = Vec::new();
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
            self.finalize(&mut events);
        }
        events
    }

    fn message_start(&self, chunk: &ChatCompletionChunk) -> StreamEvent {
        let id = if chunk.id.is_empty() {
            "unknown".to_string()
        } else {
            chunk.id.clone()
        };
        StreamEvent::MessageStart {
            message: StreamMessage {
                id,
                r#type: MessageType::Message,
                role: MessageRole::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: StreamUsage {
                    input_tokens: Some(0),
                    output_tokens: Some(0),
                },
            },
        }
    }

    fn emit_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }

        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.text_block = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
        self.push_tail(text);
    }

    fn emit_tool_call(&mut self, call: &ToolCallChunk, events: &mut Vec<StreamEvent>) {
        if !self.tool_blocks.contains_key(&call.index) {
            // Blocks are sequential on the wire: an open text block closes
            // before a tool_use block opens.
            if let Some(index) = self.text_block.take() {
                events.push(StreamEvent::ContentBlockStop { index });
            }

            let block_index = self.next_block_index;
            self.next_block_index += 1;
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("toolcall_{}", call.index));
            let name = call
                .function
                .as_ref()
                .and_then(|function| function.name.clone())
                .unwrap_or_else(|| "tool".to_string());

            events.push(StreamEvent::ContentBlockStart {
                index: block_index,
                content_block: StreamContentBlock::ToolUse {
                    id,
                    name,
                    input: JsonValue::Object(serde_json::Map::new()),
                },
            });
            self.tool_blocks.insert(call.index, ToolBlock { block_index });
        }

        // Forward only the incremental fragment, never the accumulated
        // buffer, so concatenation at the client reconstructs it exactly.
        if let Some(arguments) = call
            .function
            .as_ref()
            .and_then(|function| function.arguments.as_deref())
            && !arguments.is_empty()
        {
            let block_index = self.tool_blocks[&call.index].block_index;
            events.push(StreamEvent::ContentBlockDelta {
                index: block_index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: arguments.to_string(),
                },
            });
        }
    }

    fn close_open_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        let mut open: Vec<u32> = self.text_block.take().into_iter().collect();
        open.extend(
            std::mem::take(&mut self.tool_blocks)
                .into_values()
                .map(|block| block.block_index),
        );
        open.sort_unstable();
        for index in open {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn finalize(&mut self, events: &mut Vec<StreamEvent>) {
        let mut stop_reason = self.pending_stop.take().unwrap_or(StopReason::EndTurn);
        let mut stop_sequence = None;
        if stop_reason == StopReason::EndTurn
            && let Some(matched) = match_stop_sequence(&self.text_tail, &self.stop_sequences)
        {
            stop_reason = StopReason::StopSequence;
            stop_sequence = Some(matched.to_string());
        }

        let usage = self
            .usage
            .map(|usage| StreamUsage {
                input_tokens: Some(usage.prompt_tokens.max(0) as u32),
                output_tokens: Some(usage.completion_tokens.max(0) as u32),
            })
            .unwrap_or(StreamUsage {
                input_tokens: Some(0),
                output_tokens: Some(0),
            });

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence,
            },
            usage,
        });
        events.push(StreamEvent::MessageStop);
        self.phase = Phase::Done;
    }

    fn push_tail(&mut self, text: &str) {
        if self.tail_limit == 0 {
            return;
        }
        self.text_tail.push_str(text);
        if self.text_tail.len() > self.tail_limit {
            let mut cut = self.text_tail.len() - self.tail_limit;
            while !self.text_tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.text_tail.drain(..cut);
        }
    }
}
