use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::CapabilityError;
use crate::messages::ChatMessage;
use crate::stream::StreamEvent;

/// Options controlling a completion call.
#[derive(Clone, Debug)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Chat/summarization capability. Accepts an ordered list of role-tagged
/// messages and either streams incremental fragments or returns one
/// complete response.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn context_window(&self) -> usize;

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, CapabilityError>;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_defaults() {
        let opts = CompletionOptions::default();
        assert!(opts.max_tokens.is_none());
        assert!(opts.temperature.is_none());
        assert!(opts.stop_sequences.is_empty());
    }
}
