use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use curator_core::extract::{DocumentSource, TextExtractor};
use curator_core::ids::ConversationId;
use curator_core::messages::ChatMessage;
use curator_core::provider::ChatProvider;
use curator_core::tokens::TokenCounter;
use curator_core::units::ContextUnit;
use curator_store::attachments::{AttachmentMeta, AttachmentRepo};
use curator_store::{persist, Database, SharedStore, StoreChange};

use crate::assemble::{assemble, compute_totals, merge_attachment_context};
use crate::attachments::ingest_documents;
use crate::ingest::ReplyIngestor;
use crate::refresh::SummaryService;

/// Facade wiring the store to the async services: every mutation that can
/// change the assembled context schedules a token-total recompute and a
/// debounced summary refresh; conversation switches cancel in-flight
/// streams; changed conversations are persisted.
#[derive(Clone)]
pub struct CuratorEngine {
    store: SharedStore,
    db: Database,
    attachments: AttachmentRepo,
    provider: Arc<dyn ChatProvider>,
    counter: Arc<dyn TokenCounter>,
    summaries: SummaryService,
    ingestor: ReplyIngestor,
}

impl CuratorEngine {
    pub fn new(
        store: SharedStore,
        db: Database,
        provider: Arc<dyn ChatProvider>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let summaries = SummaryService::new(store.clone(), provider.clone(), counter.clone());
        let ingestor = ReplyIngestor::new(store.clone(), provider.clone());
        let attachments = AttachmentRepo::new(db.clone());
        Self {
            store,
            db,
            attachments,
            provider,
            counter,
            summaries,
            ingestor,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn attachments(&self) -> &AttachmentRepo {
        &self.attachments
    }

    pub fn summaries(&self) -> &SummaryService {
        &self.summaries
    }

    pub fn ingestor(&self) -> &ReplyIngestor {
        &self.ingestor
    }

    /// Subscribe to store changes and react until the store is dropped.
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let mut rx = self.store.lock().subscribe();
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => engine.handle_change(change),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn handle_change(&self, change: StoreChange) {
        match change {
            StoreChange::ConversationCreated { id } => {
                self.summaries.request_refresh(&id, true, false);
                self.persist(&id);
            }
            StoreChange::UnitsChanged { id } | StoreChange::AttachmentsChanged { id } => {
                self.recompute_totals(&id);
                self.summaries.request_refresh(&id, false, false);
                self.persist(&id);
            }
            StoreChange::ActiveChanged { previous, .. } => {
                // Leaving a conversation cancels its in-flight stream.
                if let Some(previous) = previous {
                    self.ingestor.cancel(&previous);
                }
            }
            StoreChange::ConversationDeleted { id } => {
                self.ingestor.cancel(&id);
                if let Err(error) = persist::delete_conversation(&self.db, &id) {
                    warn!(conversation = %id, error = %error, "failed to delete persisted conversation");
                }
            }
        }
    }

    fn recompute_totals(&self, id: &ConversationId) {
        let mut store = self.store.lock();
        let Some(conv) = store.get(id) else { return };
        let chunks = self
            .attachments
            .resolve(&conv.attachment_ids)
            .unwrap_or_default();
        let totals = compute_totals(&conv.units, &chunks, self.counter.as_ref(), self.provider.model());
        store.set_totals(id, totals);
    }

    fn persist(&self, id: &ConversationId) {
        let conv = match self.store.lock().get(id) {
            Some(conv) => conv.clone(),
            None => return,
        };
        if let Err(error) = persist::save_conversation(&self.db, &conv) {
            warn!(conversation = %id, error = %error, "failed to persist conversation");
        }
    }

    /// Persist every conversation (shutdown path).
    pub fn persist_all(&self) {
        let conversations = self.store.lock().conversations().to_vec();
        if let Err(error) = persist::save_all(&self.db, &conversations) {
            warn!(error = %error, "failed to persist conversations");
        }
    }

    /// Assemble the context messages a send from this conversation would
    /// produce right now: attachment chunks first, then the conversation.
    pub fn assemble_context(&self, id: &ConversationId) -> Vec<ChatMessage> {
        let store = self.store.lock();
        let Some(conv) = store.get(id) else {
            return Vec::new();
        };
        let chunks = self
            .attachments
            .resolve(&conv.attachment_ids)
            .unwrap_or_default();
        merge_attachment_context(&chunks, assemble(&conv.units, None))
    }

    /// Record a user turn in the active conversation and stream the reply
    /// back into it. Returns None without calling the API when assembly
    /// yields nothing.
    #[instrument(skip(self, text))]
    pub fn send_message(&self, text: impl Into<String>) -> Option<JoinHandle<()>> {
        let conv_id = {
            let mut store = self.store.lock();
            let conv_id = store.active_id().clone();
            store.add_unit(ContextUnit::user(text.into()));
            conv_id
        };
        let messages = self.assemble_context(&conv_id);
        if messages.is_empty() {
            return None;
        }
        Some(self.ingestor.start_reply(&conv_id, messages))
    }

    /// Consume the one-shot regeneration request (post edit-trim or
    /// edit-branch) and stream a fresh reply from the truncated prefix.
    #[instrument(skip(self))]
    pub fn regenerate_if_requested(&self) -> Option<JoinHandle<()>> {
        let request = self.store.lock().take_regeneration_request()?;
        let messages = self.assemble_context(&request.conversation_id);
        if messages.is_empty() {
            return None;
        }
        Some(self.ingestor.start_reply(&request.conversation_id, messages))
    }

    /// Ingest documents and select them for the active conversation.
    pub fn attach_documents(
        &self,
        extractor: &dyn TextExtractor,
        files: Vec<DocumentSource>,
    ) -> Vec<AttachmentMeta> {
        let metas = ingest_documents(
            &self.attachments,
            extractor,
            self.counter.as_ref(),
            self.provider.model(),
            files,
        );
        let mut store = self.store.lock();
        let conv_id = store.active_id().clone();
        for meta in &metas {
            let _ = store.select_attachment(&conv_id, &meta.id);
        }
        metas
    }
}
