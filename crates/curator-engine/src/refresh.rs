use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use curator_core::ids::ConversationId;
use curator_core::provider::ChatProvider;
use curator_core::tokens::TokenCounter;
use curator_store::SharedStore;

use crate::summary::{
    build_summary_prompt, build_summary_source, summary_options, SUMMARY_SCHEMA_VERSION,
};

/// Debounce window coalescing bursts of rapid mutations (typing, pin
/// toggles) into a single downstream call.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Drives debounced, cancellable background summary refreshes. One
/// pending timer per conversation id; re-triggering replaces rather than
/// stacks the timer. Cloneable handle over shared state.
#[derive(Clone)]
pub struct SummaryService {
    store: SharedStore,
    provider: Arc<dyn ChatProvider>,
    counter: Arc<dyn TokenCounter>,
    debounce: Duration,
    timers: Arc<DashMap<ConversationId, JoinHandle<()>>>,
}

impl SummaryService {
    pub fn new(
        store: SharedStore,
        provider: Arc<dyn ChatProvider>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self::with_debounce(store, provider, counter, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(
        store: SharedStore,
        provider: Arc<dyn ChatProvider>,
        counter: Arc<dyn TokenCounter>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            counter,
            debounce,
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Cancel any pending timer for this conversation and either refresh
    /// now or after the debounce window.
    #[instrument(skip(self), fields(conversation = %id, immediate, force))]
    pub fn request_refresh(&self, id: &ConversationId, immediate: bool, force: bool) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }

        let service = self.clone();
        let conv_id = id.clone();
        let delay = if immediate { Duration::ZERO } else { self.debounce };
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            service.timers.remove(&conv_id);
            service.generate_summary(&conv_id, force).await;
        });
        self.timers.insert(id.clone(), handle);
    }

    /// Wait for the pending refresh of a conversation to finish (if any).
    pub async fn flush(&self, id: &ConversationId) {
        if let Some((_, handle)) = self.timers.remove(id) {
            let _ = handle.await;
        }
    }

    pub fn has_pending(&self, id: &ConversationId) -> bool {
        self.timers.contains_key(id)
    }

    /// Refresh one conversation's summary. Cache-key comparison always
    /// reads the latest store state at evaluation time, so a stale
    /// scheduled refresh self-heals. A missing conversation is a no-op.
    #[instrument(skip(self), fields(conversation = %id, force))]
    pub async fn generate_summary(&self, id: &ConversationId, force: bool) {
        let (source, prior_key, prior_nonempty, prior_schema) = {
            let store = self.store.lock();
            let Some(conv) = store.get(id) else {
                return;
            };
            let source = build_summary_source(conv, self.provider.model(), self.counter.as_ref());
            (
                source,
                conv.summary.cache_key.clone(),
                !conv.summary.text.is_empty(),
                conv.summary.schema_version,
            )
        };

        if !source.has_content {
            let mut store = self.store.lock();
            store.store_summary(id, String::new(), source.cache_key, SUMMARY_SCHEMA_VERSION);
            return;
        }

        let cache_hit = !force
            && prior_nonempty
            && prior_key.as_deref() == Some(source.cache_key.as_str())
            && prior_schema == SUMMARY_SCHEMA_VERSION;
        if cache_hit {
            debug!(conversation = %id, "summary cache hit");
            return;
        }

        {
            self.store.lock().begin_summary(id);
        }

        let prompt = build_summary_prompt(&source.text);
        match self.provider.complete(&prompt, &summary_options()).await {
            Ok(text) => {
                let mut store = self.store.lock();
                store.store_summary(id, text, source.cache_key, SUMMARY_SCHEMA_VERSION);
            }
            Err(error) => {
                warn!(conversation = %id, error = %error, "summary refresh failed");
                let mut store = self.store.lock();
                store.fail_summary(id, error.to_string());
            }
        }
    }
}
