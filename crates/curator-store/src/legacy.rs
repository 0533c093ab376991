use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use curator_core::ids::{ConversationId, UnitId};
use curator_core::units::{ContextUnit, UnitKind};

use crate::conversations::Conversation;
use crate::database::Database;
use crate::error::StoreError;
use crate::persist;

const LEGACY_TABLE: &str = "chat_sessions";
const LEGACY_IMPORTED_KEY: &str = "legacy_imported";

/// One message of the pre-conversation storage shape: a flat role/text
/// array per session, no tombstones, no pins.
#[derive(Debug, Default, Deserialize)]
struct LegacyMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: Option<String>,
}

/// Import the legacy store, once. Returns the transformed conversations
/// when (and only when) the current-shape store is empty and the legacy
/// table exists and has not been adopted before. Field-by-field
/// defaulting: unknown roles become notes, missing timestamps become now,
/// unit ids are generated fresh.
pub fn import_legacy(db: &Database) -> Result<Vec<Conversation>, StoreError> {
    if persist::get_setting(db, LEGACY_IMPORTED_KEY)?.is_some() {
        return Ok(Vec::new());
    }
    if !legacy_table_exists(db)? {
        return Ok(Vec::new());
    }

    let rows: Vec<(String, String, String)> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, title, messages FROM {LEGACY_TABLE} ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut conversations = Vec::new();
    for (id, title, messages_json) in rows {
        let messages: Vec<LegacyMessage> = match serde_json::from_str(&messages_json) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session = %id, error = %e, "skipping unreadable legacy session");
                continue;
            }
        };

        let mut conv = Conversation::new(if title.is_empty() {
            "Imported conversation".to_string()
        } else {
            title
        });
        conv.id = ConversationId::from_raw(format!("conv_{id}"));
        for msg in messages {
            let kind = msg.role.parse::<UnitKind>().unwrap_or(UnitKind::Note);
            let mut unit = ContextUnit::new(kind, msg.text);
            unit.id = UnitId::new();
            if let Some(ts) = msg.ts.as_deref().and_then(|t| t.parse::<DateTime<Utc>>().ok()) {
                unit.timestamp = ts;
            }
            conv.units.push(unit);
        }
        conversations.push(conv);
    }

    persist::set_setting(db, LEGACY_IMPORTED_KEY, &Utc::now().to_rfc3339())?;
    info!(count = conversations.len(), "legacy store adopted");
    Ok(conversations)
}

fn legacy_table_exists(db: &Database) -> Result<bool, StoreError> {
    db.with_conn(|conn| {
        let count: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [LEGACY_TABLE],
                |row| row.get(0),
            )
            .unwrap_or(0);
        Ok(count > 0)
    })
}
