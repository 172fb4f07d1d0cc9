//! LoreEngine: session-scoped transient registry storage.
//!
//! The durable registry copy lives in the knowledge store as listing
//! entries; this engine holds the fast transient copies, one per session.
//! A batch checks a session's registry out, mutates it, and commits it
//! back. A missing or empty snapshot simply means the next batch hydrates
//! from the store.

use crate::registry::RegistryState;
use dashmap::DashMap;

/// Session-keyed cache of transient registry states.
#[derive(Debug, Default)]
pub struct LoreEngine {
    registries: DashMap<String, RegistryState>,
}

impl LoreEngine {
    pub fn new() -> Self {
        Self {
            registries: DashMap::new(),
        }
    }

    /// Snapshot a session's registry, or an empty one if none is cached.
    pub fn snapshot(&self, session: &str) -> RegistryState {
        self.registries
            .get(session)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Commit a registry back after a batch.
    pub fn commit(&self, session: impl Into<String>, registry: RegistryState) {
        self.registries.insert(session.into(), registry);
    }

    /// Drop a session's transient copy (it remains recoverable from the
    /// knowledge store).
    pub fn evict(&self, session: &str) -> Option<RegistryState> {
        self.registries.remove(session).map(|(_, r)| r)
    }

    pub fn session_count(&self) -> usize {
        self.registries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryRecord;

    #[test]
    fn snapshot_of_unknown_session_is_empty() {
        let engine = LoreEngine::new();
        assert!(engine.snapshot("s1").is_empty());
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn commit_then_snapshot_round_trips() {
        let engine = LoreEngine::new();
        let mut registry = RegistryState::ensure();
        registry.update(
            "a1",
            RegistryRecord {
                id: "a1".to_string(),
                kind: "character".to_string(),
                name: "character-Mira".to_string(),
                aliases: Vec::new(),
                synopsis: String::new(),
            },
        );
        engine.commit("s1", registry);

        let snapshot = engine.snapshot("s1");
        assert!(snapshot.contains("a1"));
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn evict_removes_the_transient_copy() {
        let engine = LoreEngine::new();
        engine.commit("s1", RegistryState::ensure());
        assert!(engine.evict("s1").is_some());
        assert!(engine.snapshot("s1").is_empty());
    }
}
