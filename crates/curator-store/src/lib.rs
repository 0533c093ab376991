pub mod attachments;
pub mod conversations;
pub mod database;
pub mod error;
pub mod legacy;
pub mod persist;
pub mod row_helpers;
pub mod schema;

use std::sync::Arc;

use parking_lot::Mutex;

pub use conversations::{
    Conversation, ConversationStore, EditPolicy, Lineage, ModalState, PendingAction,
    RegenerationRequest, Snapshot, StoreChange, SummaryState,
};
pub use database::Database;
pub use error::StoreError;

/// Shared handle to the single store instance. Mutations are synchronous
/// and atomic; async services take the lock, mutate, and release before
/// awaiting anything.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

pub fn shared(store: ConversationStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}
