//! Entity kind configuration — the ordered table of tracked entity kinds.
//!
//! Each kind carries the behavioral flags applied to knowledge entries of
//! that kind. The table is ordered: the first kind is the fallback for
//! unrecognized or absent kind names.

use serde::{Deserialize, Serialize};

/// Behavioral flags applied to a knowledge entry based on its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFlags {
    /// Entry is injected regardless of keyword activation.
    pub always_active: bool,
    /// Entry never participates in recursive keyword activation.
    pub exclude_recursion: bool,
}

/// A configured entity kind with its per-kind entry flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKind {
    pub name: String,
    pub flags: EntryFlags,
}

impl EntityKind {
    pub fn new(name: impl Into<String>, flags: EntryFlags) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }
}

/// Ordered table of entity kinds.
///
/// The first entry doubles as the fallback kind (a kind name that resolves
/// to nothing must still land somewhere — silently dropping an entity would
/// hide it forever).
#[derive(Debug, Clone)]
pub struct KindTable {
    kinds: Vec<EntityKind>,
}

impl KindTable {
    /// Build a table from an ordered list of kinds.
    ///
    /// An empty list is replaced by the default table; the fallback
    /// invariant requires at least one kind.
    pub fn new(kinds: Vec<EntityKind>) -> Self {
        if kinds.is_empty() {
            Self::default()
        } else {
            Self { kinds }
        }
    }

    /// The fallback kind (first configured).
    pub fn fallback(&self) -> &EntityKind {
        &self.kinds[0]
    }

    /// Resolve a kind name to a configured kind, case-insensitively.
    /// Unknown or empty names resolve to the fallback kind.
    pub fn resolve(&self, name: &str) -> &EntityKind {
        let trimmed = name.trim();
        self.kinds
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(trimmed))
            .unwrap_or_else(|| self.fallback())
    }

    /// Whether a name matches a configured kind exactly.
    pub fn is_known(&self, name: &str) -> bool {
        self.kinds
            .iter()
            .any(|k| k.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Iterate kinds in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityKind> {
        self.kinds.iter()
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self {
            kinds: vec![
                EntityKind::new(
                    "character",
                    EntryFlags {
                        always_active: false,
                        exclude_recursion: true,
                    },
                ),
                EntityKind::new(
                    "location",
                    EntryFlags {
                        always_active: false,
                        exclude_recursion: false,
                    },
                ),
                EntityKind::new(
                    "faction",
                    EntryFlags {
                        always_active: false,
                        exclude_recursion: false,
                    },
                ),
                EntityKind::new(
                    "item",
                    EntryFlags {
                        always_active: false,
                        exclude_recursion: true,
                    },
                ),
                EntityKind::new(
                    "event",
                    EntryFlags {
                        always_active: false,
                        exclude_recursion: true,
                    },
                ),
            ],
        }
    }
}
