//! Sinks and wire framing for replay output.

use crate::error::Result;
use crate::types::StreamEvent;
use serde_json::json;

/// Destination of a replay session, usually a transport response body.
///
/// The transport owns framing onto the wire and turns a client disconnect
/// into a `CancellationSignal`.
pub trait StreamSink {
    /// Write one pre-framed chunk.
    fn write(&mut self, chunk: &str) -> Result<()>;

    /// Release the sink. Called exactly once per session.
    fn end(&mut self);
}

/// Turns events and terminal payloads into wire chunks.
pub trait WireFormat: Send + Sync {
    fn event(&self, event: &StreamEvent) -> Result<String>;

    /// Payload for a stream that does not exist (or has expired).
    fn not_found(&self, stream_id: &str) -> String;

    /// Payload for a session that failed part-way.
    fn error(&self, message: &str) -> String;

    /// Terminal marker written after the last event of a completed stream.
    fn done(&self) -> String;
}

/// Server-sent-events framing: `id: <cursor>\ndata: <json>\n\n`.
#[derive(Clone, Debug)]
pub struct SseFormat {
    pub done_marker: String,
}

impl SseFormat {
    fn data(line: &str) -> String {
        format!("data: {line}\n\n")
    }
}

impl Default for SseFormat {
    fn default() -> Self {
        Self {
            done_marker: "[DONE]".to_string(),
        }
    }
}

impl WireFormat for SseFormat {
    fn event(&self, event: &StreamEvent) -> Result<String> {
        let data = serde_json::to_string(&event.payload)?;
        Ok(format!("id: {}\ndata: {data}\n\n", event.cursor))
    }

    fn not_found(&self, stream_id: &str) -> String {
        let body = json!({
            "error": {
                "type": "stream_not_found",
                "stream_id": stream_id,
                "message": format!("Stream {stream_id} not found or expired"),
            }
        });
        Self::data(&body.to_string())
    }

    fn error(&self, message: &str) -> String {
        let body = json!({
            "error": {
                "type": "replay_failed",
                "message": message,
            }
        });
        Self::data(&body.to_string())
    }

    fn done(&self) -> String {
        Self::data(&self.done_marker)
    }
}

/// Sink that keeps every chunk in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    chunks: Vec<String>,
    end_calls: usize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Contents of every `data:` line, in order.
    pub fn data(&self) -> Vec<String> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.lines())
            .filter_map(|line| line.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    /// Cursors of every `id:` line, in order.
    pub fn cursors(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.lines())
            .filter_map(|line| line.strip_prefix("id: "))
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls
    }

    pub fn is_ended(&self) -> bool {
        self.end_calls > 0
    }
}

impl StreamSink for CollectingSink {
    fn write(&mut self, chunk: &str) -> Result<()> {
        self.chunks.push(chunk.to_string());
        Ok(())
    }

    fn end(&mut self) {
        self.end_calls += 1;
    }
}
