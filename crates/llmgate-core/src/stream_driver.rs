use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use llmgate_protocol::anthropic::stream::StreamEvent;
use llmgate_protocol::openai::stream::ChatCompletionChunk;
use llmgate_protocol::sse::{self, SseDecoder, SseFrame};
use llmgate_transform::error::GatewayError;
use llmgate_transform::stream::StreamTranscoder;

const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Pump upstream SSE bytes through the stream transcoder into the client
/// event channel. The bounded `send` is the backpressure point: a slow
/// client suspends this loop, which stops pulling upstream bytes. A dropped
/// client receiver ends the loop, and dropping the upstream receiver tears
/// down the upstream read.
pub async fn pump(
    mut machine: StreamTranscoder,
    mut chunks: mpsc::Receiver<Result<Bytes, GatewayError>>,
    events: mpsc::Sender<Bytes>,
    trace_id: String,
) {
    let mut decoder = SseDecoder::new();
    let mut last_ping = Instant::now();

    'read: while let Some(item) = chunks.recv().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    event = "upstream_stream_failed",
                    trace_id = %trace_id,
                    error = %err,
                    "upstream stream failed"
                );
                let emitted = machine.on_failure(err.error_detail());
                let _ = forward(&events, &emitted).await;
                return;
            }
        };

        for frame in decoder.decode(&bytes) {
            if !handle_frame(&mut machine, frame, &events, &mut last_ping, &trace_id).await {
                break 'read;
            }
        }
        if machine.is_done() {
            break;
        }
    }

    for frame in decoder.finish() {
        if !handle_frame(&mut machine, frame, &events, &mut last_ping, &trace_id).await {
            return;
        }
    }
    if !machine.is_done() {
        let emitted = machine.on_stream_end();
        let _ = forward(&events, &emitted).await;
    }
}

/// Returns false when the stream is over or the client went away.
async fn handle_frame(
    machine: &mut StreamTranscoder,
    frame: SseFrame,
    events: &mpsc::Sender<Bytes>,
    last_ping: &mut Instant,
    trace_id: &str,
) -> bool {
    let data = match frame {
        SseFrame::Comment => {
            return maybe_ping(machine, events, last_ping).await;
        }
        SseFrame::Event { data, .. } => data,
    };

    if data == "[DONE]" {
        let emitted = machine.on_stream_end();
        let _ = forward(events, &emitted).await;
        return false;
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(
                event = "upstream_chunk_unparseable",
                trace_id = %trace_id,
                error = %err,
                "dropping upstream stream"
            );
            let failure =
                GatewayError::UpstreamProtocol("could not parse upstream stream chunk".to_string());
            let emitted = machine.on_failure(failure.error_detail());
            let _ = forward(events, &emitted).await;
            return false;
        }
    };

    let emitted = machine.on_chunk(&chunk);
    if emitted.is_empty() {
        return maybe_ping(machine, events, last_ping).await;
    }
    forward(events, &emitted).await
}

async fn maybe_ping(
    machine: &StreamTranscoder,
    events: &mpsc::Sender<Bytes>,
    last_ping: &mut Instant,
) -> bool {
    if !machine.is_started() || machine.is_done() || last_ping.elapsed() < PING_INTERVAL {
        return true;
    }
    *last_ping = Instant::now();
    forward(events, &[StreamEvent::Ping]).await
}

async fn forward(events: &mpsc::Sender<Bytes>, emitted: &[StreamEvent]) -> bool {
    for event in emitted {
        let Some(bytes) = sse::encode_event(event.name(), event) else {
            continue;
        };
        if events.send(bytes).await.is_err() {
            return false;
        }
    }
    true
}
