//! SQLite knowledge store backend.
//!
//! Single database file, one table of entries. Thread-safe via an internal
//! mutex on the connection; no statement outlives a lock, so the async trait
//! methods never hold the guard across an await point.

use super::{EntryUpdate, KnowledgeEntry, KnowledgeStore, NewEntry, StoreError, StoreResult};
use crate::kind::EntryFlags;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed knowledge store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                comment TEXT NOT NULL,
                content TEXT NOT NULL,
                keywords_json TEXT NOT NULL,
                flags_json TEXT NOT NULL,
                created_at TEXT,
                position INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_entries_comment
                ON entries(comment);

            -- WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(KnowledgeEntry, String, String)> {
        Ok((
            KnowledgeEntry {
                id: row.get(0)?,
                comment: row.get(1)?,
                content: row.get(2)?,
                keywords: Vec::new(),
                flags: EntryFlags::default(),
                created_at: row
                    .get::<_, Option<String>>(5)?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            },
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn decode(raw: (KnowledgeEntry, String, String)) -> StoreResult<KnowledgeEntry> {
        let (mut entry, keywords_json, flags_json) = raw;
        entry.keywords = serde_json::from_str(&keywords_json)?;
        entry.flags = serde_json::from_str(&flags_json)?;
        Ok(entry)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn get(&self, id: &str) -> StoreResult<Option<KnowledgeEntry>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let raw = conn
            .query_row(
                "SELECT id, comment, content, keywords_json, flags_json, created_at
                 FROM entries WHERE id = ?1",
                params![id],
                Self::row_to_entry,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<KnowledgeEntry>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, comment, content, keywords_json, flags_json, created_at
             FROM entries ORDER BY position, comment",
        )?;
        let rows = stmt.query_map([], Self::row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(Self::decode(row?)?);
        }
        Ok(entries)
    }

    async fn create(&self, entry: NewEntry) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        conn.execute(
            "INSERT INTO entries (id, comment, content, keywords_json, flags_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                entry.comment,
                entry.content,
                serde_json::to_string(&entry.keywords)?,
                serde_json::to_string(&entry.flags)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    async fn update(&self, id: &str, fields: EntryUpdate) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let exists: Option<String> = conn
            .query_row("SELECT id FROM entries WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::EntryNotFound(id.to_string()));
        }

        if let Some(comment) = fields.comment {
            conn.execute(
                "UPDATE entries SET comment = ?2 WHERE id = ?1",
                params![id, comment],
            )?;
        }
        if let Some(content) = fields.content {
            conn.execute(
                "UPDATE entries SET content = ?2 WHERE id = ?1",
                params![id, content],
            )?;
        }
        if let Some(keywords) = fields.keywords {
            conn.execute(
                "UPDATE entries SET keywords_json = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(&keywords)?],
            )?;
        }
        if let Some(flags) = fields.flags {
            conn.execute(
                "UPDATE entries SET flags_json = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(&flags)?],
            )?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let deleted = conn.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn reorder_canonically(&self) -> StoreResult<()> {
        // Canonical order is alphabetical by display name; rewrite the
        // position column in one pass.
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM entries ORDER BY comment")?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for (position, id) in ids.iter().enumerate() {
            conn.execute(
                "UPDATE entries SET position = ?2 WHERE id = ?1",
                params![id, position as i64],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(comment: &str) -> NewEntry {
        NewEntry {
            comment: comment.to_string(),
            content: "text".to_string(),
            keywords: vec!["stub".to_string()],
            flags: EntryFlags {
                always_active: false,
                exclude_recursion: true,
            },
        }
    }

    #[tokio::test]
    async fn create_get_round_trips_through_sqlite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create(new_entry("character-Mira")).await.unwrap();

        let entry = store.get(&id).await.unwrap().expect("entry should exist");
        assert_eq!(entry.comment, "character-Mira");
        assert_eq!(entry.keywords, vec!["stub".to_string()]);
        assert!(entry.flags.exclude_recursion);
        assert!(entry.created_at.is_some());
    }

    #[tokio::test]
    async fn reorder_sorts_listing_by_comment() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(new_entry("location-Ravenhall")).await.unwrap();
        store.create(new_entry("character-Mira")).await.unwrap();
        store.reorder_canonically().await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries[0].comment, "character-Mira");
        assert_eq!(entries[1].comment, "location-Ravenhall");
    }

    #[tokio::test]
    async fn delete_then_get_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create(new_entry("character-Mira")).await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.create(new_entry("character-Mira")).await.unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let entry = store.get(&id).await.unwrap().expect("entry should persist");
        assert_eq!(entry.comment, "character-Mira");
    }
}
