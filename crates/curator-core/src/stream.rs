use crate::errors::CapabilityError;

/// Events emitted while a completion streams in. Ordering contract:
///
/// Start → TextDelta* → Done
///
/// Error can appear at any point and terminates the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    /// Carries the full accumulated text so consumers can commit an exact
    /// final value regardless of flush cadence.
    Done { text: String },
    Error { error: CapabilityError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::TextDelta { .. })
    }
}
