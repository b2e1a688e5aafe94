use bytes::Bytes;
use serde::Serialize;

/// One decoded server-sent-events frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A complete event: optional `event:` name and the joined `data:` lines.
    Event {
        name: Option<String>,
        data: String,
    },
    /// A comment line (`: ...`). Some upstreams send these as keep-alives.
    Comment,
}

/// Incremental SSE decoder. Bytes are buffered until a full line is
/// available, so UTF-8 sequences and fields split across network chunks
/// reassemble correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.take_line(&String::from_utf8_lossy(&line), &mut frames);
        }

        frames
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned();
            self.take_line(line.trim_end_matches('\r'), &mut frames);
        }
        self.flush_event(&mut frames);
        frames
    }

    fn take_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.flush_event(frames);
            return;
        }
        if line.starts_with(':') {
            frames.push(SseFrame::Comment);
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.name = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn flush_event(&mut self, frames: &mut Vec<SseFrame>) {
        if self.name.is_none() && self.data.is_empty() {
            return;
        }
        frames.push(SseFrame::Event {
            name: self.name.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        });
        self.data.clear();
    }
}

/// Encode a named event frame: `event: <name>\ndata: <json>\n\n`.
pub fn encode_event<T: Serialize>(name: &str, payload: &T) -> Option<Bytes> {
    let json = serde_json::to_vec(payload).ok()?;
    let mut out = Vec::with_capacity(name.len() + json.len() + 16);
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Some(Bytes::from(out))
}
