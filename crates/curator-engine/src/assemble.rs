use curator_core::ids::UnitId;
use curator_core::messages::{ChatMessage, Role};
use curator_core::tokens::{TokenCounter, TokenTotals};
use curator_core::units::{ContextUnit, UnitKind};
use curator_store::attachments::AttachmentChunk;

/// Synthesized system message suppressing a retracted fact. Models do not
/// know a prior fact was withdrawn just because it is absent from the
/// payload, so retractions that entered earlier visible context must be
/// actively countermanded.
pub fn forget_notice(content: &str) -> String {
    format!("Note: Forget any earlier mention of '{content}'. It is incorrect or irrelevant.")
}

/// Turn a mutable set of tagged units into an ordered API payload.
///
/// Units are stably sorted by timestamp (ties keep their relative order),
/// sliced at `cut_unit_id` inclusive (an unknown cut id fails soft to the
/// whole list), and mapped to role-tagged messages with tombstoned units
/// filtered out. Forget-notices are synthesized for every unit that is
/// both removed and timestamped strictly before the most recent user turn
/// in the slice; they precede all real content so the model sees
/// corrections before substance. Retractions at or after the last user
/// turn need no notice: they never entered that turn's visible context.
pub fn assemble(units: &[ContextUnit], cut_unit_id: Option<&UnitId>) -> Vec<ChatMessage> {
    let mut sorted: Vec<&ContextUnit> = units.iter().collect();
    sorted.sort_by_key(|u| u.timestamp);

    if let Some(cut) = cut_unit_id {
        if let Some(idx) = sorted.iter().position(|u| &u.id == cut) {
            sorted.truncate(idx + 1);
        }
    }

    let last_user_ts = sorted
        .iter()
        .rev()
        .find(|u| u.kind == UnitKind::User)
        .map(|u| u.timestamp);

    let mut messages = Vec::new();
    if let Some(last_user_ts) = last_user_ts {
        for unit in &sorted {
            if unit.removed && unit.timestamp < last_user_ts {
                messages.push(ChatMessage::system(forget_notice(&unit.content)));
            }
        }
    }

    for unit in &sorted {
        if unit.removed {
            continue;
        }
        messages.push(ChatMessage {
            role: Role::from(unit.kind),
            content: unit.content.clone(),
        });
    }
    messages
}

/// Prepend every selected attachment chunk as a system-role message
/// before the assembled conversation messages.
pub fn merge_attachment_context(
    chunks: &[AttachmentChunk],
    messages: Vec<ChatMessage>,
) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = chunks
        .iter()
        .map(|chunk| {
            ChatMessage::system(format!("Reference document excerpt:\n{}", chunk.text))
        })
        .collect();
    merged.extend(messages);
    merged
}

/// Re-derive token totals from a full re-assembly. Attachment tokens are
/// tracked separately from conversational totals.
pub fn compute_totals(
    units: &[ContextUnit],
    chunks: &[AttachmentChunk],
    counter: &dyn TokenCounter,
    model: &str,
) -> TokenTotals {
    let mut totals = TokenTotals::default();
    for message in assemble(units, None) {
        let count = counter.count(&message.content, model);
        totals.total += count;
        match message.role {
            Role::User => totals.user += count,
            Role::Assistant => totals.assistant += count,
            Role::System => {}
        }
    }
    for chunk in chunks {
        totals.attachment += chunk.token_count;
    }
    totals.total += totals.attachment;
    totals
}
