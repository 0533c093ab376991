use serde::Deserialize;

use curator_core::errors::CapabilityError;
use curator_core::stream::StreamEvent;

/// Split a raw SSE chunk into (event_type, data) pairs. Lines that are
/// neither `event:` nor `data:` (comments, ids) are ignored.
pub fn parse_sse_lines(chunk: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut event_type = String::new();
    let mut data = String::new();

    for line in chunk.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.is_empty() && !data.is_empty() {
            events.push((
                if event_type.is_empty() { "message".to_string() } else { event_type.clone() },
                std::mem::take(&mut data),
            ));
            event_type.clear();
        }
    }
    if !data.is_empty() {
        events.push((
            if event_type.is_empty() { "message".to_string() } else { event_type },
            data,
        ));
    }
    events
}

/// State machine mapping provider SSE events to StreamEvents. Malformed
/// fragments are ignored; the stream's explicit end marker
/// (`message_stop`) carries the full accumulated text.
#[derive(Default)]
pub struct SseParser {
    text: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single SSE event and return zero or more StreamEvents.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        match event_type {
            "message_start" => vec![StreamEvent::Start],

            "content_block_delta" => {
                let Ok(event) = serde_json::from_str::<ContentBlockDeltaEvent>(data) else {
                    return Vec::new();
                };
                if event.delta.kind.as_deref() != Some("text_delta") {
                    return Vec::new();
                }
                let delta = event.delta.text.unwrap_or_default();
                self.text.push_str(&delta);
                vec![StreamEvent::TextDelta { delta }]
            }

            "message_stop" => vec![StreamEvent::Done {
                text: std::mem::take(&mut self.text),
            }],

            "error" => {
                let message = serde_json::from_str::<ErrorEvent>(data)
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| data.to_string());
                vec![StreamEvent::Error {
                    error: CapabilityError::StreamInterrupted(message),
                }]
            }

            // ping, content_block_start/stop, message_delta: nothing to emit
            _ => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: DeltaBody,
}

#[derive(Deserialize)]
struct DeltaBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
