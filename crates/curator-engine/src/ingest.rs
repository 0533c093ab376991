use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use curator_core::ids::ConversationId;
use curator_core::messages::ChatMessage;
use curator_core::provider::{ChatProvider, CompletionOptions};
use curator_core::stream::StreamEvent;
use curator_core::units::ContextUnit;
use curator_store::SharedStore;

/// Fixed user-visible text substituted when a whole response is
/// malformed or the stream dies before producing anything.
pub const REPLY_ERROR_PLACEHOLDER: &str =
    "[The reply could not be generated. Check the connection and try again.]";

/// How often buffered fragments are flushed to visible state. Bounds
/// update frequency; correctness of the final committed content does not
/// depend on it.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(150);

/// Consumes streaming chat replies into the store. At most one reply
/// stream per conversation: starting a new one cancels the in-flight
/// stream and discards its unflushed buffer.
#[derive(Clone)]
pub struct ReplyIngestor {
    store: SharedStore,
    provider: Arc<dyn ChatProvider>,
    flush_interval: Duration,
    active: Arc<DashMap<ConversationId, CancellationToken>>,
}

impl ReplyIngestor {
    pub fn new(store: SharedStore, provider: Arc<dyn ChatProvider>) -> Self {
        Self::with_flush_interval(store, provider, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_flush_interval(
        store: SharedStore,
        provider: Arc<dyn ChatProvider>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            flush_interval,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Cancel the in-flight stream for a conversation, if any. Called on
    /// conversation switch and before starting a replacement stream.
    pub fn cancel(&self, id: &ConversationId) {
        if let Some((_, token)) = self.active.remove(id) {
            token.cancel();
        }
    }

    pub fn is_streaming(&self, id: &ConversationId) -> bool {
        self.active.contains_key(id)
    }

    /// Start streaming a reply into a conversation. The returned handle
    /// resolves when the reply is fully committed or aborted.
    #[instrument(skip(self, messages), fields(conversation = %conversation_id, messages = messages.len()))]
    pub fn start_reply(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<ChatMessage>,
    ) -> JoinHandle<()> {
        self.cancel(conversation_id);
        let token = CancellationToken::new();
        self.active.insert(conversation_id.clone(), token.clone());

        let ingestor = self.clone();
        let conv_id = conversation_id.clone();
        tokio::spawn(async move {
            ingestor.run_stream(conv_id, messages, token).await;
        })
    }

    async fn run_stream(
        &self,
        conv_id: ConversationId,
        messages: Vec<ChatMessage>,
        token: CancellationToken,
    ) {
        let mut stream = match self
            .provider
            .stream(&messages, &CompletionOptions::default())
            .await
        {
            Ok(stream) => stream,
            Err(error) => {
                warn!(conversation = %conv_id, error = %error, "completion call failed");
                let mut store = self.store.lock();
                let _ = store.append_unit(&conv_id, ContextUnit::assistant(REPLY_ERROR_PLACEHOLDER));
                drop(store);
                self.finish(&conv_id, &token);
                return;
            }
        };

        if token.is_cancelled() {
            // Replaced or abandoned before producing anything.
            self.finish(&conv_id, &token);
            return;
        }

        let unit_id = {
            let mut store = self.store.lock();
            match store.append_unit(&conv_id, ContextUnit::assistant("")) {
                Ok(id) => id,
                Err(_) => {
                    // Conversation deleted between scheduling and start.
                    self.finish(&conv_id, &token);
                    return;
                }
            }
        };

        let mut committed = String::new();
        let mut buffer = String::new();
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    // Keep what was flushed, discard the unflushed buffer.
                    break;
                }

                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        committed.push_str(&buffer);
                        buffer.clear();
                        let mut store = self.store.lock();
                        let _ = store.update_unit_in(&conv_id, &unit_id, committed.clone());
                    }
                }

                event = stream.next() => match event {
                    Some(StreamEvent::Start) => {}
                    Some(StreamEvent::TextDelta { delta }) => buffer.push_str(&delta),
                    Some(StreamEvent::Done { text }) => {
                        // The end marker carries the exact final content.
                        let mut store = self.store.lock();
                        let _ = store.update_unit_in(&conv_id, &unit_id, text);
                        break;
                    }
                    Some(StreamEvent::Error { error }) => {
                        warn!(conversation = %conv_id, error = %error, "reply stream failed");
                        committed.push_str(&buffer);
                        let text = if committed.is_empty() {
                            REPLY_ERROR_PLACEHOLDER.to_string()
                        } else {
                            committed.clone()
                        };
                        let mut store = self.store.lock();
                        let _ = store.update_unit_in(&conv_id, &unit_id, text);
                        break;
                    }
                    None => {
                        // Stream ended without its explicit end marker.
                        committed.push_str(&buffer);
                        let text = if committed.is_empty() {
                            REPLY_ERROR_PLACEHOLDER.to_string()
                        } else {
                            committed.clone()
                        };
                        let mut store = self.store.lock();
                        let _ = store.update_unit_in(&conv_id, &unit_id, text);
                        break;
                    }
                }
            }
        }

        self.finish(&conv_id, &token);
    }

    fn finish(&self, conv_id: &ConversationId, token: &CancellationToken) {
        // If our token was cancelled, the registry entry is already gone
        // (or belongs to a replacement stream).
        if !token.is_cancelled() {
            self.active.remove(conv_id);
        }
    }
}
