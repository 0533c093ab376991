use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;

use curator_core::errors::CapabilityError;
use curator_core::messages::ChatMessage;
use curator_core::provider::{ChatProvider, CompletionOptions};
use curator_core::stream::StreamEvent;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the call itself.
    Error(CapabilityError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: a well-formed text response stream.
    pub fn stream_text(text: &str) -> Self {
        let text = text.to_string();
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.clone() },
            StreamEvent::Done { text },
        ])
    }

    /// Convenience: a stream that ends with an error event.
    pub fn stream_error(error: CapabilityError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
/// `call_count` counts every network call, streaming or not.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    async fn next_stream(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, CapabilityError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let response = self.responses.get(idx).ok_or_else(|| {
            CapabilityError::Unavailable(format!("MockProvider: no response configured for call {idx}"))
        })?;
        resolve_response(response).await
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> usize {
        200_000
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, CapabilityError> {
        self.next_stream().await
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String, CapabilityError> {
        use futures::StreamExt;

        let mut stream = self.next_stream().await?;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Done { text } => return Ok(text),
                StreamEvent::Error { error } => return Err(error),
                StreamEvent::Start | StreamEvent::TextDelta { .. } => {}
            }
        }
        // Stream ended without an explicit end marker.
        Err(CapabilityError::MalformedResponse(
            "stream ended without end marker".into(),
        ))
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: &MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, CapabilityError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                let events = events.clone();
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello world")]);
        let mut stream = mock
            .stream(&[], &CompletionOptions::default())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert_eq!(events.len(), 3); // Start, TextDelta, Done
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(&events[1], StreamEvent::TextDelta { delta } if delta == "hello world"));
        assert!(matches!(&events[2], StreamEvent::Done { text } if text == "hello world"));
    }

    #[tokio::test]
    async fn complete_returns_final_text() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("summary text")]);
        let text = mock.complete(&[], &CompletionOptions::default()).await.unwrap();
        assert_eq!(text, "summary text");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn complete_propagates_stream_error() {
        let mock = MockProvider::new(vec![MockResponse::stream_error(
            CapabilityError::NetworkError("down".into()),
        )]);
        let result = mock.complete(&[], &CompletionOptions::default()).await;
        assert!(matches!(result, Err(CapabilityError::NetworkError(_))));
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            CapabilityError::Unavailable("bad".into()),
        )]);
        let result = mock.stream(&[], &CompletionOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_text("first"),
            MockResponse::stream_text("second"),
        ]);

        assert!(mock.stream(&[], &CompletionOptions::default()).await.is_ok());
        assert_eq!(mock.call_count(), 1);

        assert!(mock.stream(&[], &CompletionOptions::default()).await.is_ok());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);

        let _ = mock.stream(&[], &CompletionOptions::default()).await;
        let result = mock.stream(&[], &CompletionOptions::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn provider_properties() {
        let mock = MockProvider::new(vec![]);
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.model(), "mock-model");
        assert_eq!(mock.context_window(), 200_000);
    }

    #[tokio::test]
    async fn delayed_response() {
        tokio::time::pause();

        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::stream_text("after delay"),
        )]);

        let handle = tokio::spawn(async move {
            mock.complete(&[], &CompletionOptions::default()).await
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        let text = handle.await.unwrap().unwrap();
        assert_eq!(text, "after delay");
    }
}
