use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use curator_core::ids::{AttachmentId, ConversationId, SnapshotId, UnitId};
use curator_core::tokens::TokenTotals;
use curator_core::units::ContextUnit;

use crate::error::StoreError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_TITLE: &str = "New conversation";

/// Cached summary state for one conversation. On refresh failure the
/// error is recorded alongside the retained last-good text, never over it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SummaryState {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cache_key: Option<String>,
    #[serde(default)]
    pub schema_version: u32,
}

/// An immutable capture of a conversation's unit list at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "SnapshotId::new")]
    pub id: SnapshotId,
    #[serde(default)]
    pub title: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub units: Vec<ContextUnit>,
}

/// Branch lineage: at most one parent per conversation (a tree, not a DAG).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lineage {
    pub parent: ConversationId,
    #[serde(default)]
    pub forked_from: Option<UnitId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default = "ConversationId::new")]
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub forked_from_unit_id: Option<UnitId>,
    #[serde(default)]
    pub units: Vec<ContextUnit>,
    #[serde(default)]
    pub attachment_ids: Vec<AttachmentId>,
    #[serde(default)]
    pub totals: TokenTotals,
    #[serde(default)]
    pub summary: SummaryState,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ConversationId::new(),
            title: title.into(),
            created_at: Utc::now(),
            parent_conversation_id: None,
            forked_from_unit_id: None,
            units: Vec::new(),
            attachment_ids: Vec::new(),
            totals: TokenTotals::default(),
            summary: SummaryState::default(),
            snapshots: Vec::new(),
        }
    }

    pub fn unit(&self, id: &UnitId) -> Option<&ContextUnit> {
        self.units.iter().find(|u| &u.id == id)
    }

    fn unit_index(&self, id: &UnitId) -> Option<usize> {
        self.units.iter().position(|u| &u.id == id)
    }

    pub fn visible_units(&self) -> impl Iterator<Item = &ContextUnit> {
        self.units.iter().filter(|u| u.visible())
    }
}

/// What to do with the rest of the conversation after editing or removing
/// a user unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditPolicy {
    DoNothing,
    Trim,
    Branch,
}

/// Which pending action an open modal resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    Edit,
    Removal,
}

/// Pending edit/removal decision. Only one modal may be open at a time;
/// an unresolved modal is discarded only by explicit close.
#[derive(Clone, Debug)]
pub enum ModalState {
    Idle,
    Open {
        unit_id: UnitId,
        draft: String,
        action: PendingAction,
    },
}

/// One-shot marker that a fresh assistant reply must be generated.
/// Consumed exactly once via [`ConversationStore::take_regeneration_request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegenerationRequest {
    pub conversation_id: ConversationId,
}

/// Change notification emitted after every mutation that can affect the
/// assembled context. Subscribers schedule token recomputes and summary
/// refreshes off these.
#[derive(Clone, Debug)]
pub enum StoreChange {
    /// Schedules an immediate (non-debounced) summary refresh.
    ConversationCreated { id: ConversationId },
    ConversationDeleted { id: ConversationId },
    UnitsChanged { id: ConversationId },
    AttachmentsChanged { id: ConversationId },
    ActiveChanged {
        previous: Option<ConversationId>,
        id: ConversationId,
    },
}

/// Owns the entity graph and all mutation operations. Single instance,
/// owned by the caller; no ambient global. All operations are synchronous
/// and atomic from the caller's perspective.
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: ConversationId,
    modal: ModalState,
    regeneration: Option<RegenerationRequest>,
    changes: broadcast::Sender<StoreChange>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::from_loaded(Vec::new())
    }

    /// Build a store from persisted conversations. An empty load seeds one
    /// fresh conversation; the store is never left with zero conversations.
    pub fn from_loaded(mut conversations: Vec<Conversation>) -> Self {
        if conversations.is_empty() {
            conversations.push(Conversation::new(DEFAULT_TITLE));
        }
        let active = conversations[0].id.clone();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            conversations,
            active,
            modal: ModalState::Idle,
            regeneration: None,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }

    // --- Accessors ---

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    pub fn active_id(&self) -> &ConversationId {
        &self.active
    }

    pub fn active(&self) -> &Conversation {
        self.conversations
            .iter()
            .find(|c| c.id == self.active)
            .expect("active conversation always exists")
    }

    fn active_mut(&mut self) -> &mut Conversation {
        let id = self.active.clone();
        self.get_mut(&id).expect("active conversation always exists")
    }

    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    // --- Conversation lifecycle ---

    pub fn set_active(&mut self, id: &ConversationId) -> Result<(), StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        if &self.active == id {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.active, id.clone());
        self.emit(StoreChange::ActiveChanged {
            previous: Some(previous),
            id: id.clone(),
        });
        Ok(())
    }

    /// Create a conversation, optionally seeded with a deep copy of
    /// another conversation's units (ids preserved on purpose, so a unit
    /// can be tracked across branch lineage). Becomes the active
    /// conversation.
    pub fn create_conversation(
        &mut self,
        title: Option<String>,
        base_units: Vec<ContextUnit>,
        lineage: Option<Lineage>,
    ) -> ConversationId {
        let mut conv = Conversation::new(title.unwrap_or_else(|| DEFAULT_TITLE.to_string()));
        conv.units = base_units;
        if let Some(lineage) = lineage {
            conv.parent_conversation_id = Some(lineage.parent);
            conv.forked_from_unit_id = lineage.forked_from;
        }
        let id = conv.id.clone();
        self.conversations.push(conv);
        self.emit(StoreChange::ConversationCreated { id: id.clone() });

        let previous = std::mem::replace(&mut self.active, id.clone());
        self.emit(StoreChange::ActiveChanged {
            previous: Some(previous),
            id: id.clone(),
        });
        id
    }

    /// Delete a conversation. Activation falls to the first remaining
    /// conversation; deleting the last one synthesizes a fresh empty
    /// conversation so the store is never empty.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> Result<(), StoreError> {
        let idx = self
            .conversations
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        self.conversations.remove(idx);
        self.emit(StoreChange::ConversationDeleted { id: id.clone() });

        if self.regeneration.as_ref().is_some_and(|r| &r.conversation_id == id) {
            self.regeneration = None;
        }

        if &self.active == id {
            // The modal targets a unit of the active conversation.
            self.modal = ModalState::Idle;

            if self.conversations.is_empty() {
                let fresh = Conversation::new(DEFAULT_TITLE);
                let fresh_id = fresh.id.clone();
                self.conversations.push(fresh);
                self.emit(StoreChange::ConversationCreated { id: fresh_id.clone() });
                self.active = fresh_id.clone();
                self.emit(StoreChange::ActiveChanged { previous: Some(id.clone()), id: fresh_id });
            } else {
                let first = self.conversations[0].id.clone();
                self.active = first.clone();
                self.emit(StoreChange::ActiveChanged { previous: Some(id.clone()), id: first });
            }
        }
        Ok(())
    }

    // --- Unit mutations (active conversation) ---

    pub fn add_unit(&mut self, unit: ContextUnit) -> UnitId {
        let conv_id = self.active.clone();
        self.append_unit(&conv_id, unit)
            .expect("active conversation always exists")
    }

    /// Append a unit to a specific conversation (streaming consumers may
    /// write into a conversation that is no longer active).
    pub fn append_unit(
        &mut self,
        conversation_id: &ConversationId,
        unit: ContextUnit,
    ) -> Result<UnitId, StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let id = unit.id.clone();
        conv.units.push(unit);
        self.emit(StoreChange::UnitsChanged { id: conversation_id.clone() });
        Ok(id)
    }

    pub fn update_unit_in(
        &mut self,
        conversation_id: &ConversationId,
        unit_id: &UnitId,
        content: impl Into<String>,
    ) -> Result<(), StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let unit = conv
            .units
            .iter_mut()
            .find(|u| &u.id == unit_id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {unit_id}")))?;
        unit.content = content.into();
        self.emit(StoreChange::UnitsChanged { id: conversation_id.clone() });
        Ok(())
    }

    pub fn update_unit(&mut self, id: &UnitId, content: impl Into<String>) -> Result<(), StoreError> {
        let conv_id = self.active.clone();
        let conv = self.active_mut();
        match conv.units.iter_mut().find(|u| &u.id == id) {
            Some(unit) => {
                unit.content = content.into();
                self.emit(StoreChange::UnitsChanged { id: conv_id });
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("unit {id}"))),
        }
    }

    /// Toggle a unit's pin. Pinning a removed unit is disallowed.
    /// Returns the new pinned state.
    pub fn toggle_pin(&mut self, id: &UnitId) -> Result<bool, StoreError> {
        let conv_id = self.active.clone();
        let conv = self.active_mut();
        let unit = conv
            .units
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {id}")))?;
        if unit.removed {
            return Err(StoreError::Conflict("cannot pin a removed unit".into()));
        }
        unit.pinned = !unit.pinned;
        let pinned = unit.pinned;
        self.emit(StoreChange::UnitsChanged { id: conv_id });
        Ok(pinned)
    }

    /// Toggle a unit's tombstone. Removal clears the pin; restoring does
    /// not re-pin. Returns the new removed state.
    pub fn toggle_removed(&mut self, id: &UnitId) -> Result<bool, StoreError> {
        let conv_id = self.active.clone();
        let conv = self.active_mut();
        let unit = conv
            .units
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {id}")))?;
        unit.removed = !unit.removed;
        if unit.removed {
            unit.pinned = false;
        }
        let removed = unit.removed;
        self.emit(StoreChange::UnitsChanged { id: conv_id });
        Ok(removed)
    }

    fn mark_removed(&mut self, id: &UnitId) -> Result<(), StoreError> {
        let conv_id = self.active.clone();
        let conv = self.active_mut();
        let unit = conv
            .units
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {id}")))?;
        unit.removed = true;
        unit.pinned = false;
        self.emit(StoreChange::UnitsChanged { id: conv_id });
        Ok(())
    }

    /// Truncate the unit list to end at (and include) `unit_id`.
    pub fn trim_after(
        &mut self,
        conversation_id: &ConversationId,
        unit_id: &UnitId,
    ) -> Result<(), StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let idx = conv
            .unit_index(unit_id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {unit_id}")))?;
        conv.units.truncate(idx + 1);
        self.emit(StoreChange::UnitsChanged { id: conversation_id.clone() });
        Ok(())
    }

    /// Fork a new conversation from the prefix ending at `unit_id`
    /// (inclusive). The prefix keeps its unit ids; lineage is recorded.
    /// The new conversation becomes active.
    pub fn branch_from(
        &mut self,
        conversation_id: &ConversationId,
        unit_id: &UnitId,
        title: Option<String>,
    ) -> Result<ConversationId, StoreError> {
        let source = self
            .get(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let idx = source
            .unit_index(unit_id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {unit_id}")))?;
        let prefix = source.units[..=idx].to_vec();
        let title = title.unwrap_or_else(|| format!("{} (branch)", source.title));
        let lineage = Lineage {
            parent: conversation_id.clone(),
            forked_from: Some(unit_id.clone()),
        };
        Ok(self.create_conversation(Some(title), prefix, Some(lineage)))
    }

    /// Splice a new assistant unit immediately after `after_unit_id`.
    /// Supports out-of-order insertion; the new unit's timestamp is chosen
    /// between its neighbors so timestamp ordering stays consistent.
    pub fn insert_assistant_after(
        &mut self,
        conversation_id: &ConversationId,
        after_unit_id: &UnitId,
        content: impl Into<String>,
    ) -> Result<UnitId, StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let idx = conv
            .unit_index(after_unit_id)
            .ok_or_else(|| StoreError::NotFound(format!("unit {after_unit_id}")))?;

        let mut unit = ContextUnit::assistant(content);
        let after_ts = conv.units[idx].timestamp;
        unit.timestamp = match conv.units.get(idx + 1) {
            Some(next) if next.timestamp > after_ts => {
                after_ts + (next.timestamp - after_ts) / 2
            }
            // Tie or out-of-order neighbor: share the timestamp and rely
            // on stable in-list order.
            Some(_) => after_ts,
            None => Utc::now().max(after_ts),
        };

        let id = unit.id.clone();
        conv.units.insert(idx + 1, unit);
        self.emit(StoreChange::UnitsChanged { id: conversation_id.clone() });
        Ok(id)
    }

    // --- Snapshots ---

    pub fn take_snapshot(
        &mut self,
        conversation_id: &ConversationId,
        title: Option<String>,
    ) -> Result<SnapshotId, StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            title: title.unwrap_or_else(|| format!("Checkpoint ({} units)", conv.units.len())),
            created_at: Utc::now(),
            units: conv.units.clone(),
        };
        let id = snapshot.id.clone();
        conv.snapshots.push(snapshot);
        Ok(id)
    }

    /// Replace the live unit list in place with the snapshot's capture.
    pub fn restore_snapshot(
        &mut self,
        conversation_id: &ConversationId,
        snapshot_id: &SnapshotId,
    ) -> Result<(), StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let snapshot = conv
            .snapshots
            .iter()
            .find(|s| &s.id == snapshot_id)
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {snapshot_id}")))?;
        conv.units = snapshot.units.clone();
        self.emit(StoreChange::UnitsChanged { id: conversation_id.clone() });
        Ok(())
    }

    /// Branch a new conversation from a snapshot, exactly as branching
    /// from a live unit would.
    pub fn branch_from_snapshot(
        &mut self,
        conversation_id: &ConversationId,
        snapshot_id: &SnapshotId,
        title: Option<String>,
    ) -> Result<ConversationId, StoreError> {
        let conv = self
            .get(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let snapshot = conv
            .snapshots
            .iter()
            .find(|s| &s.id == snapshot_id)
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {snapshot_id}")))?;
        let units = snapshot.units.clone();
        let forked_from = units.last().map(|u| u.id.clone());
        let title = title.unwrap_or_else(|| format!("{} (branch)", conv.title));
        let lineage = Lineage {
            parent: conversation_id.clone(),
            forked_from,
        };
        Ok(self.create_conversation(Some(title), units, Some(lineage)))
    }

    // --- Attachment selection ---

    /// Select an attachment for the conversation. Returns false if it was
    /// already selected.
    pub fn select_attachment(
        &mut self,
        conversation_id: &ConversationId,
        attachment_id: &AttachmentId,
    ) -> Result<bool, StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        if conv.attachment_ids.contains(attachment_id) {
            return Ok(false);
        }
        conv.attachment_ids.push(attachment_id.clone());
        self.emit(StoreChange::AttachmentsChanged { id: conversation_id.clone() });
        Ok(true)
    }

    pub fn deselect_attachment(
        &mut self,
        conversation_id: &ConversationId,
        attachment_id: &AttachmentId,
    ) -> Result<bool, StoreError> {
        let conv = self
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        let before = conv.attachment_ids.len();
        conv.attachment_ids.retain(|a| a != attachment_id);
        let changed = conv.attachment_ids.len() != before;
        if changed {
            self.emit(StoreChange::AttachmentsChanged { id: conversation_id.clone() });
        }
        Ok(changed)
    }

    // --- Edit/removal flow ---

    /// Open the pending-decision modal for a unit of the active
    /// conversation. An unresolved modal must be explicitly closed first.
    pub fn open_modal(
        &mut self,
        unit_id: &UnitId,
        draft: impl Into<String>,
        action: PendingAction,
    ) -> Result<(), StoreError> {
        if matches!(self.modal, ModalState::Open { .. }) {
            return Err(StoreError::Conflict("a modal is already open".into()));
        }
        if self.active().unit(unit_id).is_none() {
            return Err(StoreError::NotFound(format!("unit {unit_id}")));
        }
        self.modal = ModalState::Open {
            unit_id: unit_id.clone(),
            draft: draft.into(),
            action,
        };
        Ok(())
    }

    /// Discard an unresolved modal.
    pub fn close_modal(&mut self) {
        self.modal = ModalState::Idle;
    }

    /// Resolve the open modal with one of the three fixed policies.
    /// Returns the id of the branched conversation when policy is Branch.
    pub fn resolve_modal(&mut self, policy: EditPolicy) -> Result<Option<ConversationId>, StoreError> {
        let (unit_id, draft, action) = match std::mem::replace(&mut self.modal, ModalState::Idle) {
            ModalState::Open { unit_id, draft, action } => (unit_id, draft, action),
            ModalState::Idle => {
                return Err(StoreError::Conflict("no modal is open".into()));
            }
        };
        match action {
            PendingAction::Edit => self.apply_edit(&unit_id, draft, policy),
            PendingAction::Removal => self.apply_removal(&unit_id, policy),
        }
    }

    /// Apply an edit of a user-authored unit under one of the three fixed
    /// policies. Trim and Branch mark that a fresh assistant reply must be
    /// generated (in the same or the branched conversation respectively).
    pub fn apply_edit(
        &mut self,
        unit_id: &UnitId,
        content: impl Into<String>,
        policy: EditPolicy,
    ) -> Result<Option<ConversationId>, StoreError> {
        self.update_unit(unit_id, content)?;
        match policy {
            EditPolicy::DoNothing => Ok(None),
            EditPolicy::Trim => {
                let conv_id = self.active.clone();
                self.trim_after(&conv_id, unit_id)?;
                self.regeneration = Some(RegenerationRequest { conversation_id: conv_id });
                Ok(None)
            }
            EditPolicy::Branch => {
                let source_id = self.active.clone();
                let new_id = self.branch_from(&source_id, unit_id, None)?;
                self.regeneration = Some(RegenerationRequest { conversation_id: new_id.clone() });
                Ok(Some(new_id))
            }
        }
    }

    /// Apply removal of a user unit under one of the three fixed policies.
    /// Removal only tombstones (plus optional trim/branch); it never
    /// triggers regeneration.
    pub fn apply_removal(
        &mut self,
        unit_id: &UnitId,
        policy: EditPolicy,
    ) -> Result<Option<ConversationId>, StoreError> {
        self.mark_removed(unit_id)?;
        match policy {
            EditPolicy::DoNothing => Ok(None),
            EditPolicy::Trim => {
                let conv_id = self.active.clone();
                self.trim_after(&conv_id, unit_id)?;
                Ok(None)
            }
            EditPolicy::Branch => {
                let source_id = self.active.clone();
                let new_id = self.branch_from(&source_id, unit_id, None)?;
                Ok(Some(new_id))
            }
        }
    }

    /// Consume the pending regeneration request, if any. One-shot: a
    /// second call returns None until a new request is recorded.
    pub fn take_regeneration_request(&mut self) -> Option<RegenerationRequest> {
        self.regeneration.take()
    }

    // --- Derived-state write-backs (no refresh events) ---

    pub fn set_totals(&mut self, id: &ConversationId, totals: TokenTotals) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.totals = totals;
                true
            }
            None => false,
        }
    }

    pub fn begin_summary(&mut self, id: &ConversationId) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.summary.loading = true;
                true
            }
            None => false,
        }
    }

    /// Write back a finished summary. Returns false (no-op) when the
    /// conversation is gone, which is the stale-in-flight case.
    pub fn store_summary(
        &mut self,
        id: &ConversationId,
        text: String,
        cache_key: String,
        schema_version: u32,
    ) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.summary.text = text;
                conv.summary.cache_key = Some(cache_key);
                conv.summary.schema_version = schema_version;
                conv.summary.updated_at = Some(Utc::now());
                conv.summary.loading = false;
                conv.summary.error = None;
                true
            }
            None => {
                debug!(conversation = %id, "summary write-back skipped, conversation gone");
                false
            }
        }
    }

    /// Record a summary failure. The previous summary text is retained so
    /// a transient failure never blanks the display.
    pub fn fail_summary(&mut self, id: &ConversationId, error: String) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.summary.loading = false;
                conv.summary.error = Some(error);
                true
            }
            None => false,
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use curator_core::units::UnitKind;

    fn store_with_units(n: usize) -> (ConversationStore, Vec<UnitId>) {
        let mut store = ConversationStore::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let kind = if i % 2 == 0 { UnitKind::User } else { UnitKind::Assistant };
            let mut unit = ContextUnit::new(kind, format!("unit {i}"));
            // Distinct, strictly increasing timestamps.
            unit.timestamp = Utc::now() + Duration::milliseconds(i as i64 * 10);
            ids.push(store.add_unit(unit));
        }
        (store, ids)
    }

    #[test]
    fn new_store_has_one_active_conversation() {
        let store = ConversationStore::new();
        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.active().title, DEFAULT_TITLE);
        assert!(store.active().units.is_empty());
    }

    #[test]
    fn create_conversation_becomes_active() {
        let mut store = ConversationStore::new();
        let id = store.create_conversation(Some("Research".into()), Vec::new(), None);
        assert_eq!(store.active_id(), &id);
        assert_eq!(store.active().title, "Research");
    }

    #[test]
    fn create_preserves_base_unit_ids() {
        let mut store = ConversationStore::new();
        let unit = ContextUnit::user("seed");
        let unit_id = unit.id.clone();
        let id = store.create_conversation(None, vec![unit], None);
        assert_eq!(store.get(&id).unwrap().units[0].id, unit_id);
    }

    #[test]
    fn deleting_last_conversation_synthesizes_fresh_one() {
        let mut store = ConversationStore::new();
        let only = store.active_id().clone();
        store.delete_conversation(&only).unwrap();
        assert_eq!(store.conversations().len(), 1);
        assert_ne!(store.active_id(), &only);
        assert!(store.active().units.is_empty());
    }

    #[test]
    fn deleting_active_falls_back_to_first_remaining() {
        let mut store = ConversationStore::new();
        let first = store.active_id().clone();
        let second = store.create_conversation(Some("second".into()), Vec::new(), None);
        assert_eq!(store.active_id(), &second);
        store.delete_conversation(&second).unwrap();
        assert_eq!(store.active_id(), &first);
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn deleting_missing_conversation_is_not_found() {
        let mut store = ConversationStore::new();
        let result = store.delete_conversation(&ConversationId::from_raw("conv_missing"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn update_unit_changes_only_target() {
        let (mut store, ids) = store_with_units(4);
        store.update_unit(&ids[1], "X").unwrap();
        let conv = store.active();
        assert_eq!(conv.units[0].content, "unit 0");
        assert_eq!(conv.units[1].content, "X");
        assert_eq!(conv.units[2].content, "unit 2");
        assert_eq!(conv.units[3].content, "unit 3");
    }

    #[test]
    fn toggle_pin_roundtrip() {
        let (mut store, ids) = store_with_units(1);
        assert!(store.toggle_pin(&ids[0]).unwrap());
        assert!(!store.toggle_pin(&ids[0]).unwrap());
    }

    #[test]
    fn pinning_removed_unit_is_rejected() {
        let (mut store, ids) = store_with_units(1);
        store.toggle_removed(&ids[0]).unwrap();
        assert!(matches!(store.toggle_pin(&ids[0]), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn removal_clears_pin_and_restore_does_not_repin() {
        let (mut store, ids) = store_with_units(1);
        store.toggle_pin(&ids[0]).unwrap();
        assert!(store.toggle_removed(&ids[0]).unwrap());
        assert!(!store.active().units[0].pinned);
        assert!(!store.toggle_removed(&ids[0]).unwrap());
        assert!(!store.active().units[0].pinned);
    }

    #[test]
    fn removed_units_are_tombstones_not_deleted() {
        let (mut store, ids) = store_with_units(3);
        store.toggle_removed(&ids[1]).unwrap();
        assert_eq!(store.active().units.len(), 3);
        assert_eq!(store.active().visible_units().count(), 2);
    }

    #[test]
    fn trim_after_keeps_prefix_inclusive() {
        let (mut store, ids) = store_with_units(4);
        let conv_id = store.active_id().clone();
        store.trim_after(&conv_id, &ids[1]).unwrap();
        let conv = store.active();
        assert_eq!(conv.units.len(), 2);
        assert_eq!(conv.units[0].id, ids[0]);
        assert_eq!(conv.units[1].id, ids[1]);
    }

    #[test]
    fn branch_prefix_fidelity() {
        let (mut store, ids) = store_with_units(4);
        let source_id = store.active_id().clone();
        let branch_id = store.branch_from(&source_id, &ids[1], None).unwrap();

        let branch = store.get(&branch_id).unwrap();
        assert_eq!(branch.units.len(), 2);
        assert_eq!(branch.units[0].id, ids[0]);
        assert_eq!(branch.units[1].id, ids[1]);
        assert_eq!(branch.parent_conversation_id.as_ref(), Some(&source_id));
        assert_eq!(branch.forked_from_unit_id.as_ref(), Some(&ids[1]));

        // Source conversation is untouched.
        let source = store.get(&source_id).unwrap();
        assert_eq!(source.units.len(), 4);

        // Branch is active now.
        assert_eq!(store.active_id(), &branch_id);
    }

    #[test]
    fn insert_assistant_after_splices_mid_list() {
        let (mut store, ids) = store_with_units(3);
        let conv_id = store.active_id().clone();
        let new_id = store
            .insert_assistant_after(&conv_id, &ids[0], "spliced")
            .unwrap();
        let conv = store.active();
        assert_eq!(conv.units.len(), 4);
        assert_eq!(conv.units[1].id, new_id);
        assert_eq!(conv.units[1].kind, UnitKind::Assistant);
        // Timestamp ordering is consistent with list order.
        assert!(conv.units[0].timestamp <= conv.units[1].timestamp);
        assert!(conv.units[1].timestamp <= conv.units[2].timestamp);
    }

    #[test]
    fn insert_assistant_after_last_appends() {
        let (mut store, ids) = store_with_units(2);
        let conv_id = store.active_id().clone();
        let new_id = store
            .insert_assistant_after(&conv_id, &ids[1], "tail")
            .unwrap();
        let conv = store.active();
        assert_eq!(conv.units.last().unwrap().id, new_id);
        assert!(conv.units[1].timestamp <= conv.units[2].timestamp);
    }

    #[test]
    fn snapshot_restore_replaces_in_place() {
        let (mut store, _ids) = store_with_units(2);
        let conv_id = store.active_id().clone();
        let snap_id = store.take_snapshot(&conv_id, Some("before".into())).unwrap();

        store.add_unit(ContextUnit::user("later"));
        assert_eq!(store.active().units.len(), 3);

        store.restore_snapshot(&conv_id, &snap_id).unwrap();
        assert_eq!(store.active().units.len(), 2);
        // Restore targets the same conversation; no new one is created.
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn branch_from_snapshot_records_lineage() {
        let (mut store, ids) = store_with_units(2);
        let conv_id = store.active_id().clone();
        let snap_id = store.take_snapshot(&conv_id, None).unwrap();
        store.add_unit(ContextUnit::user("after snapshot"));

        let branch_id = store.branch_from_snapshot(&conv_id, &snap_id, None).unwrap();
        let branch = store.get(&branch_id).unwrap();
        assert_eq!(branch.units.len(), 2);
        assert_eq!(branch.units[1].id, ids[1]);
        assert_eq!(branch.parent_conversation_id.as_ref(), Some(&conv_id));
        assert_eq!(branch.forked_from_unit_id.as_ref(), Some(&ids[1]));
    }

    #[test]
    fn attachment_selection_deduplicates() {
        let mut store = ConversationStore::new();
        let conv_id = store.active_id().clone();
        let att = AttachmentId::new();
        assert!(store.select_attachment(&conv_id, &att).unwrap());
        assert!(!store.select_attachment(&conv_id, &att).unwrap());
        assert_eq!(store.active().attachment_ids.len(), 1);
        assert!(store.deselect_attachment(&conv_id, &att).unwrap());
        assert!(!store.deselect_attachment(&conv_id, &att).unwrap());
    }

    #[test]
    fn edit_do_nothing_leaves_later_units_untouched() {
        let (mut store, ids) = store_with_units(4);
        store
            .apply_edit(&ids[1], "X", EditPolicy::DoNothing)
            .unwrap();
        let conv = store.active();
        assert_eq!(conv.units.len(), 4);
        assert_eq!(conv.units[1].content, "X");
        assert_eq!(conv.units[2].content, "unit 2");
        assert!(store.take_regeneration_request().is_none());
    }

    #[test]
    fn edit_trim_truncates_and_requests_regeneration() {
        let (mut store, ids) = store_with_units(4);
        let conv_id = store.active_id().clone();
        store.apply_edit(&ids[1], "X", EditPolicy::Trim).unwrap();
        assert_eq!(store.active().units.len(), 2);
        assert_eq!(store.active().units[1].content, "X");
        let req = store.take_regeneration_request().unwrap();
        assert_eq!(req.conversation_id, conv_id);
    }

    #[test]
    fn edit_branch_forks_and_requests_regeneration_there() {
        let (mut store, ids) = store_with_units(4);
        let source_id = store.active_id().clone();
        let new_id = store
            .apply_edit(&ids[1], "X", EditPolicy::Branch)
            .unwrap()
            .unwrap();

        // Edited content persisted in both the source and the branch.
        assert_eq!(store.get(&source_id).unwrap().units[1].content, "X");
        assert_eq!(store.get(&new_id).unwrap().units[1].content, "X");
        assert_eq!(store.get(&source_id).unwrap().units.len(), 4);
        assert_eq!(store.get(&new_id).unwrap().units.len(), 2);

        assert_eq!(store.active_id(), &new_id);
        let req = store.take_regeneration_request().unwrap();
        assert_eq!(req.conversation_id, new_id);
    }

    #[test]
    fn removal_never_requests_regeneration() {
        let (mut store, ids) = store_with_units(4);
        store.apply_removal(&ids[1], EditPolicy::Trim).unwrap();
        assert!(store.take_regeneration_request().is_none());
        // Tombstoned and trimmed: two units remain, second removed.
        assert_eq!(store.active().units.len(), 2);
        assert!(store.active().units[1].removed);
    }

    #[test]
    fn regeneration_request_is_one_shot() {
        let (mut store, ids) = store_with_units(2);
        store.apply_edit(&ids[0], "X", EditPolicy::Trim).unwrap();
        assert!(store.take_regeneration_request().is_some());
        assert!(store.take_regeneration_request().is_none());
    }

    #[test]
    fn modal_opens_resolves_and_returns_to_idle() {
        let (mut store, ids) = store_with_units(3);
        store
            .open_modal(&ids[1], "edited", PendingAction::Edit)
            .unwrap();
        assert!(matches!(store.modal(), ModalState::Open { .. }));

        store.resolve_modal(EditPolicy::DoNothing).unwrap();
        assert!(matches!(store.modal(), ModalState::Idle));
        assert_eq!(store.active().units[1].content, "edited");
    }

    #[test]
    fn second_modal_requires_explicit_close() {
        let (mut store, ids) = store_with_units(2);
        store.open_modal(&ids[0], "a", PendingAction::Edit).unwrap();
        let result = store.open_modal(&ids[1], "b", PendingAction::Edit);
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        store.close_modal();
        store.open_modal(&ids[1], "b", PendingAction::Edit).unwrap();
    }

    #[test]
    fn resolve_without_open_modal_is_conflict() {
        let mut store = ConversationStore::new();
        assert!(matches!(
            store.resolve_modal(EditPolicy::DoNothing),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn modal_removal_resolves_to_tombstone() {
        let (mut store, ids) = store_with_units(3);
        store
            .open_modal(&ids[0], "", PendingAction::Removal)
            .unwrap();
        store.resolve_modal(EditPolicy::DoNothing).unwrap();
        assert!(store.active().units[0].removed);
        assert_eq!(store.active().units.len(), 3);
    }

    #[test]
    fn mutations_emit_change_events() {
        let mut store = ConversationStore::new();
        let mut rx = store.subscribe();
        let conv_id = store.active_id().clone();
        store.add_unit(ContextUnit::user("hello"));

        match rx.try_recv().unwrap() {
            StoreChange::UnitsChanged { id } => assert_eq!(id, conv_id),
            other => panic!("expected UnitsChanged, got {other:?}"),
        }
    }

    #[test]
    fn create_emits_created_then_active_changed() {
        let mut store = ConversationStore::new();
        let mut rx = store.subscribe();
        let id = store.create_conversation(None, Vec::new(), None);

        assert!(matches!(rx.try_recv().unwrap(), StoreChange::ConversationCreated { id: ref c } if c == &id));
        assert!(matches!(rx.try_recv().unwrap(), StoreChange::ActiveChanged { id: ref c, .. } if c == &id));
    }

    #[test]
    fn summary_write_back_skips_missing_conversation() {
        let mut store = ConversationStore::new();
        let gone = ConversationId::from_raw("conv_gone");
        assert!(!store.store_summary(&gone, "text".into(), "key".into(), 1));
        assert!(!store.fail_summary(&gone, "err".into()));
        assert!(!store.begin_summary(&gone));
    }

    #[test]
    fn summary_failure_retains_last_good_text() {
        let mut store = ConversationStore::new();
        let id = store.active_id().clone();
        store.store_summary(&id, "good summary".into(), "key1".into(), 1);
        store.fail_summary(&id, "network down".into());

        let summary = &store.active().summary;
        assert_eq!(summary.text, "good summary");
        assert_eq!(summary.error.as_deref(), Some("network down"));
        assert!(!summary.loading);
    }

    #[test]
    fn deleting_conversation_drops_its_regeneration_request() {
        let (mut store, ids) = store_with_units(2);
        let conv_id = store.active_id().clone();
        store.apply_edit(&ids[0], "X", EditPolicy::Trim).unwrap();
        store.delete_conversation(&conv_id).unwrap();
        assert!(store.take_regeneration_request().is_none());
    }

    #[test]
    fn conversation_partial_payload_default_fills() {
        let parsed: Conversation =
            serde_json::from_str(r#"{"title": "old shape"}"#).unwrap();
        assert_eq!(parsed.title, "old shape");
        assert!(parsed.units.is_empty());
        assert!(parsed.attachment_ids.is_empty());
        assert!(!parsed.summary.loading);
        assert!(parsed.id.as_str().starts_with("conv_"));
    }
}
