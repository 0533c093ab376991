use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use curator_core::ids::AttachmentId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// An uploaded document, addressed by id; its text lives in chunks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub id: AttachmentId,
    pub name: String,
    pub total_tokens: u32,
    pub created_at: String,
}

/// One token-bounded slice of an attachment. Immutable once produced,
/// addressed by (attachment_id, index).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentChunk {
    pub attachment_id: AttachmentId,
    pub index: u32,
    pub text: String,
    pub token_count: u32,
    pub embedding: Option<Vec<f32>>,
}

/// Chunk content handed to the repo by the ingestion pipeline.
#[derive(Clone, Debug)]
pub struct NewChunk {
    pub text: String,
    pub token_count: u32,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Clone)]
pub struct AttachmentRepo {
    db: Database,
}

impl AttachmentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a document's chunks under a fresh attachment id.
    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()))]
    pub fn add(&self, name: &str, chunks: &[NewChunk]) -> Result<AttachmentMeta, StoreError> {
        let id = AttachmentId::new();
        let now = Utc::now().to_rfc3339();
        let total_tokens: u32 = chunks.iter().map(|c| c.token_count).sum();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attachments (id, name, total_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), name, total_tokens, now],
            )?;
            for (index, chunk) in chunks.iter().enumerate() {
                let embedding = chunk
                    .embedding
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                conn.execute(
                    "INSERT INTO attachment_chunks (attachment_id, idx, text, token_count, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        id.as_str(),
                        index as u32,
                        chunk.text,
                        chunk.token_count,
                        embedding,
                    ],
                )?;
            }
            Ok(AttachmentMeta {
                id: id.clone(),
                name: name.to_string(),
                total_tokens,
                created_at: now.clone(),
            })
        })
    }

    pub fn get(&self, id: &AttachmentId) -> Result<AttachmentMeta, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, total_tokens, created_at FROM attachments WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_meta(row),
                None => Err(StoreError::NotFound(format!("attachment {id}"))),
            }
        })
    }

    /// List all attachments, newest first.
    pub fn list(&self) -> Result<Vec<AttachmentMeta>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, total_tokens, created_at FROM attachments
                 ORDER BY created_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_meta(row)?);
            }
            Ok(results)
        })
    }

    /// Ordered chunks for one attachment.
    pub fn chunks(&self, id: &AttachmentId) -> Result<Vec<AttachmentChunk>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT attachment_id, idx, text, token_count, embedding
                 FROM attachment_chunks WHERE attachment_id = ?1 ORDER BY idx ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_chunk(row)?);
            }
            Ok(results)
        })
    }

    /// Resolve a selection of attachment ids to one flat, ordered chunk
    /// sequence. Missing ids are skipped, not fatal.
    pub fn resolve(&self, ids: &[AttachmentId]) -> Result<Vec<AttachmentChunk>, StoreError> {
        let mut all = Vec::new();
        for id in ids {
            all.extend(self.chunks(id)?);
        }
        Ok(all)
    }

    #[instrument(skip(self), fields(attachment_id = %id))]
    pub fn delete(&self, id: &AttachmentId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM attachment_chunks WHERE attachment_id = ?1",
                [id.as_str()],
            )?;
            conn.execute("DELETE FROM attachments WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }
}

fn row_to_meta(row: &rusqlite::Row<'_>) -> Result<AttachmentMeta, StoreError> {
    Ok(AttachmentMeta {
        id: AttachmentId::from_raw(row_helpers::get::<String>(row, 0, "attachments", "id")?),
        name: row_helpers::get(row, 1, "attachments", "name")?,
        total_tokens: row_helpers::get::<i64>(row, 2, "attachments", "total_tokens")? as u32,
        created_at: row_helpers::get(row, 3, "attachments", "created_at")?,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> Result<AttachmentChunk, StoreError> {
    let embedding_raw: Option<String> =
        row_helpers::get_opt(row, 4, "attachment_chunks", "embedding")?;
    let embedding = embedding_raw
        .map(|raw| {
            serde_json::from_str::<Vec<f32>>(&raw).map_err(|e| StoreError::CorruptRow {
                table: "attachment_chunks",
                column: "embedding",
                detail: e.to_string(),
            })
        })
        .transpose()?;

    Ok(AttachmentChunk {
        attachment_id: AttachmentId::from_raw(row_helpers::get::<String>(
            row,
            0,
            "attachment_chunks",
            "attachment_id",
        )?),
        index: row_helpers::get::<i64>(row, 1, "attachment_chunks", "idx")? as u32,
        text: row_helpers::get(row, 2, "attachment_chunks", "text")?,
        token_count: row_helpers::get::<i64>(row, 3, "attachment_chunks", "token_count")? as u32,
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk(text: &str, tokens: u32) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            token_count: tokens,
            embedding: None,
        }
    }

    #[test]
    fn add_and_get() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let meta = repo
            .add("notes.md", &[new_chunk("part one", 10), new_chunk("part two", 12)])
            .unwrap();
        assert!(meta.id.as_str().starts_with("att_"));
        assert_eq!(meta.total_tokens, 22);

        let fetched = repo.get(&meta.id).unwrap();
        assert_eq!(fetched.name, "notes.md");
        assert_eq!(fetched.total_tokens, 22);
    }

    #[test]
    fn chunks_come_back_ordered() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let chunks: Vec<NewChunk> = (0..5).map(|i| new_chunk(&format!("chunk {i}"), i + 1)).collect();
        let meta = repo.add("doc.txt", &chunks).unwrap();

        let stored = repo.chunks(&meta.id).unwrap();
        assert_eq!(stored.len(), 5);
        for (i, chunk) in stored.iter().enumerate() {
            assert_eq!(chunk.index, i as u32);
            assert_eq!(chunk.text, format!("chunk {i}"));
        }
    }

    #[test]
    fn resolve_flattens_in_selection_order() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let a = repo.add("a.txt", &[new_chunk("a0", 1), new_chunk("a1", 1)]).unwrap();
        let b = repo.add("b.txt", &[new_chunk("b0", 1)]).unwrap();

        let resolved = repo.resolve(&[b.id.clone(), a.id.clone()]).unwrap();
        let texts: Vec<&str> = resolved.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["b0", "a0", "a1"]);
    }

    #[test]
    fn resolve_skips_missing_ids() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let a = repo.add("a.txt", &[new_chunk("a0", 1)]).unwrap();
        let resolved = repo
            .resolve(&[AttachmentId::from_raw("att_gone"), a.id.clone()])
            .unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn embedding_roundtrip() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let meta = repo
            .add(
                "vec.txt",
                &[NewChunk {
                    text: "embedded".into(),
                    token_count: 2,
                    embedding: Some(vec![0.25, -0.5]),
                }],
            )
            .unwrap();
        let chunks = repo.chunks(&meta.id).unwrap();
        assert_eq!(chunks[0].embedding.as_deref(), Some(&[0.25, -0.5][..]));
    }

    #[test]
    fn delete_removes_meta_and_chunks() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        let meta = repo.add("gone.txt", &[new_chunk("x", 1)]).unwrap();
        repo.delete(&meta.id).unwrap();
        assert!(repo.get(&meta.id).is_err());
        assert!(repo.chunks(&meta.id).unwrap().is_empty());
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = Database::in_memory().unwrap();
        let repo = AttachmentRepo::new(db);
        assert!(matches!(
            repo.get(&AttachmentId::from_raw("att_missing")),
            Err(StoreError::NotFound(_))
        ));
    }
}
