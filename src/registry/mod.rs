//! Registry state — the compact, recoverable index of known entities.
//!
//! The registry is layered over the knowledge store: one record per tracked
//! entity, keyed by the store's entry id. It lives transiently in session
//! memory and durably as plain-text listing blocks written back into the
//! store under a reserved naming convention, so it can be rebuilt even when
//! the transient copy is lost.
//!
//! Round-trip law: `hydrate(serialize(state))` reproduces every record's
//! id, kind, name, aliases, and synopsis.

use crate::store::KnowledgeEntry;
use std::collections::{BTreeMap, BTreeSet};

/// Prefix reserved for internal knowledge entries (registry listings).
pub const RESERVED_PREFIX: &str = "lore-registry";

/// Placeholder returned by [`RegistryState::serialize`] when no entities
/// are tracked yet. Readable by humans and safe to hand to the classifier.
pub const EMPTY_LISTING: &str = "No registry entries available yet.";

/// The reserved display name of the listing entry for one kind.
pub fn listing_name(kind: &str) -> String {
    format!("{}-{}", RESERVED_PREFIX, kind)
}

/// One tracked entity: the registry's view of a knowledge-store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub id: String,
    pub kind: String,
    /// Canonical display name, kind-prefixed.
    pub name: String,
    pub aliases: Vec<String>,
    pub synopsis: String,
}

/// In-memory index of registry records plus the set of kinds touched since
/// the last serialization.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    index: BTreeMap<String, RegistryRecord>,
    dirty: BTreeSet<String>,
}

/// Collapse newlines and the field separator so a record value cannot break
/// the line-oriented listing format.
fn sanitize(value: &str) -> String {
    value
        .replace(['\n', '\r'], " ")
        .replace(" | ", " / ")
        .trim()
        .to_string()
}

impl RegistryState {
    /// Create an empty registry. Idempotent counterpart of a session's
    /// "ensure initialized" step.
    pub fn ensure() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn get(&self, id: &str) -> Option<&RegistryRecord> {
        self.index.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate records in id order.
    pub fn records(&self) -> impl Iterator<Item = &RegistryRecord> {
        self.index.values()
    }

    /// Records of one kind, in id order.
    pub fn records_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a RegistryRecord> {
        self.index.values().filter(move |r| r.kind == kind)
    }

    /// Upsert a record under `id`.
    ///
    /// The record's own `id` field is always re-synchronized to the key —
    /// self-healing against drift between callers that build records by hand.
    pub fn update(&mut self, id: &str, mut record: RegistryRecord) {
        record.id = id.to_string();
        self.dirty.insert(record.kind.clone());
        self.index.insert(id.to_string(), record);
    }

    /// Remove a record (duplicate absorption). Returns the removed record.
    pub fn remove(&mut self, id: &str) -> Option<RegistryRecord> {
        let removed = self.index.remove(id);
        if let Some(record) = &removed {
            self.dirty.insert(record.kind.clone());
        }
        removed
    }

    /// Mark a kind's listing as needing re-serialization.
    pub fn mark_dirty(&mut self, kind: &str) {
        self.dirty.insert(kind.to_string());
    }

    /// Drain the set of kinds touched since the last serialization.
    pub fn take_dirty(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty)
    }

    /// Serialize the full registry into one listing block per kind.
    /// Returns [`EMPTY_LISTING`] when no records are tracked.
    pub fn serialize(&self) -> String {
        if self.index.is_empty() {
            return EMPTY_LISTING.to_string();
        }
        let kinds: BTreeSet<&str> = self.index.values().map(|r| r.kind.as_str()).collect();
        kinds
            .into_iter()
            .map(|kind| self.serialize_kind(kind))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Serialize a single kind's listing block.
    ///
    /// One header line, then one numbered line per record:
    /// `"<ordinal>. id: X | name: Y | aliases: A; B | synopsis: S"`.
    pub fn serialize_kind(&self, kind: &str) -> String {
        let mut lines = vec![format!("Known {} entries:", kind)];
        for (ordinal, record) in self.records_of_kind(kind).enumerate() {
            // The alias field is ';'-joined, so a ';' inside one alias
            // would split it on hydrate.
            let aliases = record
                .aliases
                .iter()
                .map(|a| sanitize(a).replace(';', ","))
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!(
                "{}. id: {} | name: {} | aliases: {} | synopsis: {}",
                ordinal + 1,
                sanitize(&record.id),
                sanitize(&record.name),
                aliases,
                sanitize(&record.synopsis),
            ));
        }
        lines.join("\n")
    }

    /// Rebuild the index from knowledge-store entries whose display name
    /// follows the reserved listing convention.
    ///
    /// Replaces the in-memory index only when at least one record was
    /// recovered — an empty or unparseable scan never destroys a populated
    /// index. Returns the number of records recovered.
    pub fn hydrate(&mut self, entries: &[KnowledgeEntry]) -> usize {
        let mut recovered: BTreeMap<String, RegistryRecord> = BTreeMap::new();

        for entry in entries {
            let Some(kind) = entry
                .comment
                .trim()
                .strip_prefix(RESERVED_PREFIX)
                .and_then(|rest| rest.strip_prefix('-'))
            else {
                continue;
            };
            for line in entry.content.lines() {
                if let Some(record) = parse_listing_line(line, kind) {
                    recovered.insert(record.id.clone(), record);
                }
            }
        }

        let count = recovered.len();
        if count > 0 {
            self.index = recovered;
            self.dirty.clear();
        }
        count
    }
}

/// Parse one numbered listing line back into a record.
///
/// Tolerant of leading whitespace and ordinal drift; returns `None` for
/// header lines, blanks, and anything that lost its field markers.
fn parse_listing_line(line: &str, kind: &str) -> Option<RegistryRecord> {
    let trimmed = line.trim();
    let dot = trimmed.find(". ")?;
    trimmed[..dot].parse::<usize>().ok()?;
    let body = &trimmed[dot + 2..];

    // Markers stop at the colon: values may be empty, and trailing
    // whitespace does not survive editors or line trimming.
    let body = body.strip_prefix("id:")?;
    let name_at = body.find(" | name:")?;
    let alias_at = body.find(" | aliases:")?;
    let synopsis_at = body.find(" | synopsis:")?;
    if !(name_at < alias_at && alias_at < synopsis_at) {
        return None;
    }

    let id = body[..name_at].trim();
    let name = body[name_at + " | name:".len()..alias_at].trim();
    let aliases_raw = body[alias_at + " | aliases:".len()..synopsis_at].trim();
    let synopsis = body[synopsis_at + " | synopsis:".len()..].trim();

    if id.is_empty() || name.is_empty() {
        return None;
    }

    let aliases = aliases_raw
        .split(';')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    Some(RegistryRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        aliases,
        synopsis: synopsis.to_string(),
    })
}
