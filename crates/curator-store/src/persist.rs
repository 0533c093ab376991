use chrono::{DateTime, Utc};
use tracing::warn;

use curator_core::ids::ConversationId;

use crate::conversations::Conversation;
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Version tag written with every conversation payload. Older payloads are
/// upgraded on load by serde default-filling and rewritten on next save.
pub const STORAGE_VERSION: u32 = 1;

/// Upsert one conversation.
pub fn save_conversation(db: &Database, conv: &Conversation) -> Result<(), StoreError> {
    let payload = serde_json::to_string(conv)?;
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO conversations (id, title, created_at, version, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 version = excluded.version,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                conv.id.as_str(),
                conv.title,
                conv.created_at.to_rfc3339(),
                STORAGE_VERSION,
                payload,
                now,
            ],
        )?;
        Ok(())
    })
}

pub fn save_all(db: &Database, conversations: &[Conversation]) -> Result<(), StoreError> {
    for conv in conversations {
        save_conversation(db, conv)?;
    }
    Ok(())
}

pub fn delete_conversation(db: &Database, id: &ConversationId) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM conversations WHERE id = ?1", [id.as_str()])?;
        Ok(())
    })
}

/// Load all persisted conversations, oldest first. A partially-malformed
/// payload default-fills (serde defaults on every field); a payload that
/// is not JSON at all falls back to the row's columns. Nothing here
/// rejects the whole load.
pub fn load_conversations(db: &Database) -> Result<Vec<Conversation>, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, version, payload
             FROM conversations ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row_helpers::get(row, 0, "conversations", "id")?;
            let title: String = row_helpers::get(row, 1, "conversations", "title")?;
            let created_at: String = row_helpers::get(row, 2, "conversations", "created_at")?;
            let payload: String = row_helpers::get(row, 4, "conversations", "payload")?;

            let conv = match serde_json::from_str::<Conversation>(&payload) {
                Ok(conv) => conv,
                Err(e) => {
                    warn!(conversation = %id, error = %e, "unreadable payload, default-filling from columns");
                    let mut conv = Conversation::new(title);
                    conv.id = ConversationId::from_raw(id);
                    if let Ok(ts) = created_at.parse::<DateTime<Utc>>() {
                        conv.created_at = ts;
                    }
                    conv
                }
            };
            conversations.push(conv);
        }
        Ok(conversations)
    })
}

/// Read a settings value.
pub fn get_setting(db: &Database, key: &str) -> Result<Option<String>, StoreError> {
    db.with_conn(|conn| {
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
            .ok();
        Ok(value)
    })
}

/// Write a settings value.
pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::units::ContextUnit;

    #[test]
    fn save_and_load_roundtrip() {
        let db = Database::in_memory().unwrap();
        let mut conv = Conversation::new("My chat");
        conv.units.push(ContextUnit::user("hello"));
        conv.units.push(ContextUnit::assistant("hi"));
        save_conversation(&db, &conv).unwrap();

        let loaded = load_conversations(&db).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, conv.id);
        assert_eq!(loaded[0].title, "My chat");
        assert_eq!(loaded[0].units.len(), 2);
        assert_eq!(loaded[0].units[0].id, conv.units[0].id);
    }

    #[test]
    fn save_is_upsert() {
        let db = Database::in_memory().unwrap();
        let mut conv = Conversation::new("v1");
        save_conversation(&db, &conv).unwrap();
        conv.title = "v2".into();
        save_conversation(&db, &conv).unwrap();

        let loaded = load_conversations(&db).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "v2");
    }

    #[test]
    fn partial_payload_default_fills() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, title, created_at, version, payload, updated_at)
                 VALUES ('conv_old', 'older shape', '2024-01-01T00:00:00Z', 0,
                         '{\"id\":\"conv_old\",\"title\":\"older shape\"}', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let loaded = load_conversations(&db).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "conv_old");
        assert!(loaded[0].units.is_empty());
        assert!(!loaded[0].summary.loading);
    }

    #[test]
    fn garbage_payload_falls_back_to_columns() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, title, created_at, version, payload, updated_at)
                 VALUES ('conv_bad', 'damaged', '2024-06-01T00:00:00Z', 1, 'not json', 'x')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let loaded = load_conversations(&db).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "conv_bad");
        assert_eq!(loaded[0].title, "damaged");
        assert!(loaded[0].units.is_empty());
    }

    #[test]
    fn delete_removes_row() {
        let db = Database::in_memory().unwrap();
        let conv = Conversation::new("doomed");
        save_conversation(&db, &conv).unwrap();
        delete_conversation(&db, &conv.id).unwrap();
        assert!(load_conversations(&db).unwrap().is_empty());
    }

    #[test]
    fn settings_roundtrip() {
        let db = Database::in_memory().unwrap();
        assert!(get_setting(&db, "missing").unwrap().is_none());
        set_setting(&db, "k", "v1").unwrap();
        set_setting(&db, "k", "v2").unwrap();
        assert_eq!(get_setting(&db, "k").unwrap().as_deref(), Some("v2"));
    }
}
