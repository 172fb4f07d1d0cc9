//! Knowledge store boundary — the external CRUD collaborator.
//!
//! The pipeline only ever touches the store through [`KnowledgeStore`], so
//! transports stay swappable: an in-memory store for tests and embedding,
//! a SQLite file for durable single-user setups, or whatever the host
//! application already persists entries in.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::kind::EntryFlags;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur during knowledge store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store rejected operation: {0}")]
    Rejected(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A knowledge-store entry as the pipeline sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    /// Display name, e.g. `character-Mira`.
    pub comment: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub flags: EntryFlags,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields for creating a new entry; the store mints the id.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub comment: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub flags: EntryFlags,
}

/// Partial update of an existing entry; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub comment: Option<String>,
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub flags: Option<EntryFlags>,
}

/// The CRUD contract the pipeline requires of a knowledge store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetch one entry; `Ok(None)` when the id is unknown.
    async fn get(&self, id: &str) -> StoreResult<Option<KnowledgeEntry>>;

    /// List all entries.
    async fn list(&self) -> StoreResult<Vec<KnowledgeEntry>>;

    /// Create an entry and return the store-assigned id.
    async fn create(&self, entry: NewEntry) -> StoreResult<String>;

    /// Apply a partial update to an existing entry.
    async fn update(&self, id: &str, fields: EntryUpdate) -> StoreResult<()>;

    /// Delete an entry by id (used for duplicate absorption).
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Re-apply the store's canonical entry ordering. Triggered after a
    /// merge renames an entry's display name.
    async fn reorder_canonically(&self) -> StoreResult<()>;
}

/// In-memory knowledge store — the reference implementation used in tests
/// and by embedders that persist entries themselves.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, KnowledgeEntry>>,
    reorder_calls: Mutex<usize>,
    fail_creates: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an entry with a fixed id.
    pub fn with_entry(self, entry: KnowledgeEntry) -> Self {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(entry.id.clone(), entry);
        self
    }

    /// Make every `create` call fail — for exercising the failure ledger.
    pub fn with_failing_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }

    /// How many times the canonical reorder side effect was triggered.
    pub fn reorder_calls(&self) -> usize {
        *self.reorder_calls.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<KnowledgeEntry>> {
        Ok(self
            .entries
            .lock()
            .expect("memory store lock poisoned")
            .get(id)
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<KnowledgeEntry>> {
        Ok(self
            .entries
            .lock()
            .expect("memory store lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn create(&self, entry: NewEntry) -> StoreResult<String> {
        if self.fail_creates {
            return Err(StoreError::Rejected("create disabled".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let stored = KnowledgeEntry {
            id: id.clone(),
            comment: entry.comment,
            content: entry.content,
            keywords: entry.keywords,
            flags: entry.flags,
            created_at: Some(Utc::now()),
        };
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(id.clone(), stored);
        Ok(id)
    }

    async fn update(&self, id: &str, fields: EntryUpdate) -> StoreResult<()> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::EntryNotFound(id.to_string()))?;
        if let Some(comment) = fields.comment {
            entry.comment = comment;
        }
        if let Some(content) = fields.content {
            entry.content = content;
        }
        if let Some(keywords) = fields.keywords {
            entry.keywords = keywords;
        }
        if let Some(flags) = fields.flags {
            entry.flags = flags;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::EntryNotFound(id.to_string()))
    }

    async fn reorder_canonically(&self) -> StoreResult<()> {
        *self.reorder_calls.lock().expect("memory store lock poisoned") += 1;
        Ok(())
    }
}
