use sha2::{Digest, Sha256};

use curator_core::messages::ChatMessage;
use curator_core::provider::CompletionOptions;
use curator_core::tokens::TokenCounter;
use curator_core::units::{ContextUnit, UnitKind};
use curator_store::Conversation;

/// Bump when the summary's required structure changes. Every cached
/// summary produced under an older version becomes a cache miss on its
/// next refresh trigger.
pub const SUMMARY_SCHEMA_VERSION: u32 = 2;

/// Hard cap on the model's output, paired with the word target in the
/// instructions.
pub const SUMMARY_MAX_TOKENS: u32 = 512;

const SYSTEM_NOTE_CHAR_CAP: usize = 500;
const PINNED_CHAR_CAP: usize = 400;
const RECENT_CHAR_CAP: usize = 600;
const RECENT_WINDOW_TOKEN_BUDGET: u32 = 1200;
const MAX_SOURCE_CHARS: usize = 12_000;

/// Everything the refresh pipeline needs to decide whether to call the
/// summarization capability at all.
#[derive(Clone, Debug)]
pub struct SummarySource {
    pub text: String,
    pub cache_key: String,
    pub has_content: bool,
}

/// Build the bounded textual digest a summary is generated from, plus its
/// content-derived cache key.
pub fn build_summary_source(
    conversation: &Conversation,
    model: &str,
    counter: &dyn TokenCounter,
) -> SummarySource {
    let mut visible: Vec<&ContextUnit> = conversation.units.iter().filter(|u| u.visible()).collect();
    visible.sort_by_key(|u| u.timestamp);

    // Partition: pinned first (any kind), then non-pinned system/note,
    // then the conversational remainder.
    let pinned: Vec<&ContextUnit> = visible.iter().copied().filter(|u| u.pinned).collect();
    let system_notes: Vec<&ContextUnit> = visible
        .iter()
        .copied()
        .filter(|u| !u.pinned && matches!(u.kind, UnitKind::System | UnitKind::Note))
        .collect();
    let remainder: Vec<&ContextUnit> = visible
        .iter()
        .copied()
        .filter(|u| !u.pinned && matches!(u.kind, UnitKind::User | UnitKind::Assistant))
        .collect();

    // Recent window: walk the remainder newest-first under a token budget
    // (pinned units are already included verbatim), then restore
    // chronological order.
    let mut recent: Vec<String> = Vec::new();
    let mut budget = RECENT_WINDOW_TOKEN_BUDGET;
    for unit in remainder.iter().rev() {
        let line = render_unit(unit, RECENT_CHAR_CAP);
        let cost = counter.count(&line, model);
        if cost > budget {
            break;
        }
        budget -= cost;
        recent.push(line);
    }
    recent.reverse();

    let mut blocks = Vec::new();
    blocks.push(metadata_block(conversation, model));
    if !system_notes.is_empty() {
        blocks.push(section(
            "## Standing instructions",
            system_notes.iter().map(|u| render_unit(u, SYSTEM_NOTE_CHAR_CAP)),
        ));
    }
    if !pinned.is_empty() {
        blocks.push(section(
            "## Pinned",
            pinned.iter().map(|u| render_unit(u, PINNED_CHAR_CAP)),
        ));
    }
    if !recent.is_empty() {
        blocks.push(section("## Recent turns", recent.iter().cloned()));
    }

    let text = truncate_keep_tail(&blocks.join("\n\n"), MAX_SOURCE_CHARS);
    let cache_key = compute_cache_key(
        conversation,
        visible.len(),
        visible.last().map(|u| u.timestamp.to_rfc3339()),
        system_notes.len(),
        pinned.len(),
        recent.len(),
    );

    SummarySource {
        text,
        cache_key,
        has_content: !visible.is_empty(),
    }
}

fn render_unit(unit: &ContextUnit, char_cap: usize) -> String {
    format!("[{}] {}", unit.kind, truncate_chars(unit.content.trim(), char_cap))
}

fn metadata_block(conversation: &Conversation, model: &str) -> String {
    let mut lines = vec![
        "## Conversation".to_string(),
        format!("Title: {}", conversation.title),
        format!("Created: {}", conversation.created_at.to_rfc3339()),
        format!("Model: {model}"),
    ];
    if let Some(parent) = &conversation.parent_conversation_id {
        lines.push(format!("Branched from: {parent}"));
    }
    lines.join("\n")
}

fn section(header: &str, lines: impl Iterator<Item = String>) -> String {
    let mut out = header.to_string();
    for line in lines {
        out.push('\n');
        out.push_str(&line);
    }
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Hard-truncate to a character cap, keeping the tail (the most recent
/// content) when the join is too large.
fn truncate_keep_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

/// Deterministic fingerprint of everything that determines a summary's
/// correctness. Any change to these inputs invalidates the cache.
fn compute_cache_key(
    conversation: &Conversation,
    visible_count: usize,
    last_visible_ts: Option<String>,
    system_count: usize,
    pinned_count: usize,
    recent_count: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SUMMARY_SCHEMA_VERSION.to_le_bytes());
    hasher.update((visible_count as u64).to_le_bytes());
    hasher.update(last_visible_ts.unwrap_or_default().as_bytes());
    hasher.update((system_count as u64).to_le_bytes());
    hasher.update((pinned_count as u64).to_le_bytes());
    hasher.update((recent_count as u64).to_le_bytes());
    hasher.update(conversation.title.as_bytes());
    format!("{:x}", hasher.finalize())
}

const SUMMARY_INSTRUCTIONS: &str = "You maintain a running summary of a curated \
conversation. Write a stand-alone digest that a reader (or the model itself) \
could use to continue the conversation without the transcript: state who wants \
what, decisions made, facts to remember, and open threads. Preserve standing \
instructions and pinned facts verbatim where they matter. Stay under 180 words. \
Respond with the summary only.";

const SUMMARY_EXAMPLE_INPUT: &str = "## Conversation\nTitle: Birthday planning\n\
Created: 2024-03-01T09:00:00+00:00\nModel: example-model\n\n\
## Pinned\n[user] The party is on April 6th, budget 300 euro.\n\n\
## Recent turns\n[user] Can you suggest a venue near the park?\n\
[assistant] The Orangery or the boathouse cafe both fit the budget.\n\
[user] Boathouse sounds good, what about catering?";

const SUMMARY_EXAMPLE_OUTPUT: &str = "The user is planning a birthday party on \
April 6th with a 300 euro budget (pinned). After venue suggestions near the \
park, they chose the boathouse cafe. Open thread: catering options for the \
boathouse, which the assistant was about to address.";

/// The summarization call is fixed and deterministic: temperature 0, a
/// canonical worked example alongside the real source, and a hard
/// output-length target.
pub fn build_summary_prompt(source: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SUMMARY_INSTRUCTIONS),
        ChatMessage::user(SUMMARY_EXAMPLE_INPUT),
        ChatMessage::assistant(SUMMARY_EXAMPLE_OUTPUT),
        ChatMessage::user(source.to_string()),
    ]
}

pub fn summary_options() -> CompletionOptions {
    CompletionOptions {
        max_tokens: Some(SUMMARY_MAX_TOKENS),
        temperature: Some(0.0),
        stop_sequences: Vec::new(),
    }
}
