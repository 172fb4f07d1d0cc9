//! Entity normalizer — shapes a raw observation into its canonical entry form.
//!
//! An observation arrives as loosely-structured extraction output: a name or
//! comment, free text, maybe a kind, maybe trigger terms under `keywords`
//! and/or `keys`, maybe a caller-supplied id. Normalization produces the
//! canonical shape the orchestrator consumes: a kind-prefixed display name,
//! refined keywords, and per-kind behavior flags.
//!
//! Normalization never fails — an unknown kind falls back to the table's
//! first configured kind.

use crate::keywords::{canonical_stub, refine_keywords};
use crate::kind::{EntryFlags, KindTable};
use crate::registry::RESERVED_PREFIX;
use serde::{Deserialize, Serialize};

/// A raw entity observation produced by the extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawObservation {
    /// Display name; `comment` is accepted as an alias for extraction
    /// stages that emit entry-shaped output directly.
    #[serde(default, alias = "comment")]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Legacy field name for trigger terms; unioned with `keywords`.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Caller-supplied id for the fast path; discarded if it no longer
    /// resolves to a live entry.
    #[serde(default)]
    pub id: Option<String>,
}

/// The canonical entry shape consumed by the resolution orchestrator.
/// Built once per observation, then discarded.
#[derive(Debug, Clone)]
pub struct NormalizedEntity {
    pub provided_id: Option<String>,
    pub kind: String,
    /// Kind-prefixed display name, e.g. `character-Mira`.
    pub comment: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub flags: EntryFlags,
}

impl NormalizedEntity {
    /// The canonical stub: display name minus kind prefix, lowercased.
    pub fn stub(&self) -> String {
        canonical_stub(&self.comment, &self.kind)
    }
}

/// Whether a name is reserved for internal entries (registry listings).
/// Reserved names pass through normalization unprefixed.
pub fn is_reserved_name(name: &str) -> bool {
    name.trim().starts_with(RESERVED_PREFIX)
}

/// Build the display name `<kind>-<Name>` unless the name already carries
/// that prefix or is reserved.
fn display_name(name: &str, kind: &str, kinds: &KindTable) -> String {
    let trimmed = name.trim();
    if is_reserved_name(trimmed) {
        return trimmed.to_string();
    }
    if let Some((prefix, _rest)) = trimmed.split_once('-') {
        if kinds.is_known(prefix) {
            return trimmed.to_string();
        }
    }
    format!("{}-{}", kind, trimmed)
}

/// Rewrite a leading bracketed template header so it embeds the resolved
/// display name. The free text stays self-describing even if the entry is
/// later reordered away from its heading.
///
/// `[Mira | first seen: ch.3] text` becomes
/// `[character-Mira | first seen: ch.3] text`.
fn rewrite_header(content: &str, display: &str) -> String {
    let trimmed = content.trim_start();
    if !trimmed.starts_with('[') {
        return content.to_string();
    }
    let Some(close) = trimmed.find(']') else {
        return content.to_string();
    };
    let header = &trimmed[1..close];
    let rest = &trimmed[close + 1..];
    let rewritten = match header.split_once('|') {
        Some((_name, tail)) => format!("[{} |{}]", display, tail.trim_end()),
        None => format!("[{}]", display),
    };
    format!("{}{}", rewritten, rest)
}

/// Normalize a raw observation against the kind table.
///
/// `kind_override` pins the final kind (used after classifier lookup
/// re-resolves it); when absent, the observation's own kind is used.
/// `player_name` marks the end-user's character: a matching stub forces
/// the always-active flag so the player's own entry is never dropped.
pub fn normalize(
    obs: &RawObservation,
    kinds: &KindTable,
    kind_override: Option<&str>,
    player_name: Option<&str>,
) -> NormalizedEntity {
    let kind = kinds
        .resolve(kind_override.or(obs.kind.as_deref()).unwrap_or(""))
        .clone();

    let comment = display_name(&obs.name, &kind.name, kinds);
    let content = rewrite_header(&obs.content, &comment);

    let mut raw_terms = obs.keywords.clone();
    for key in &obs.keys {
        if !raw_terms.contains(key) {
            raw_terms.push(key.clone());
        }
    }
    let keywords = refine_keywords(&raw_terms, &comment, &kind.name);

    let mut flags = kind.flags;
    let stub = canonical_stub(&comment, &kind.name);
    if let Some(player) = player_name {
        if !stub.is_empty() && stub.eq_ignore_ascii_case(player.trim()) {
            flags.always_active = true;
        }
    }

    NormalizedEntity {
        provided_id: obs.id.clone().filter(|id| !id.trim().is_empty()),
        kind: kind.name,
        comment,
        content,
        keywords,
        flags,
    }
}
