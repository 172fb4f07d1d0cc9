//! Batch processor — sequences entity observations through the orchestrator.
//!
//! Observations are processed strictly in order, never concurrently: entity
//! N may refer to an entity created by observation N−1 within the same
//! batch, and the in-batch working set is what makes that visible. After
//! the last observation, every registry kind touched during the batch is
//! re-serialized into the knowledge store under its reserved listing entry.
//!
//! No single bad entity aborts a batch; failures accumulate in the ledger.
//! The one exception is missing required configuration, which surfaces
//! immediately.

use crate::entity::RawObservation;
use crate::kind::EntryFlags;
use crate::registry::{listing_name, RegistryState};
use crate::resolve::{Orchestrator, Resolution, ResolveError};
use crate::store::{EntryUpdate, NewEntry};
use std::collections::HashMap;
use tracing::{info, warn};

/// One failed observation in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub name: String,
    pub reason: String,
}

/// End-of-batch results ledger.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Ids of entries created during the batch.
    pub created: Vec<String>,
    /// Ids of entries merged into during the batch.
    pub merged: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

/// Sequences a batch of observations and finalizes registry persistence.
pub struct BatchProcessor {
    orchestrator: Orchestrator,
}

impl BatchProcessor {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run one batch against the registry.
    ///
    /// Hydrates an empty registry from the store's reserved listing entries,
    /// loads current entries into the id-keyed working set, resolves each
    /// observation in order, then writes dirty kind listings back.
    pub async fn run(
        &self,
        observations: &[RawObservation],
        registry: &mut RegistryState,
    ) -> Result<BatchOutcome, ResolveError> {
        let store = self.orchestrator.store();

        let entries = store.list().await.map_err(|e| ResolveError::Store {
            name: "batch load".to_string(),
            source: e,
        })?;

        if registry.is_empty() {
            let recovered = registry.hydrate(&entries);
            if recovered > 0 {
                info!(recovered, "registry hydrated from knowledge store");
            }
        }

        let mut existing: HashMap<String, _> = entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let mut outcome = BatchOutcome::default();

        for obs in observations {
            match self
                .orchestrator
                .resolve_observation(obs, registry, &mut existing)
                .await
            {
                Ok(Resolution::Created { id }) => outcome.created.push(id),
                Ok(Resolution::Merged { id }) => outcome.merged.push(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(name = %obs.name, error = %e, "entity resolution failed");
                    outcome.failed.push(BatchFailure {
                        name: obs.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.persist_listings(registry, &existing, &mut outcome).await;

        info!(
            created = outcome.created.len(),
            merged = outcome.merged.len(),
            failed = outcome.failed.len(),
            "batch complete"
        );

        Ok(outcome)
    }

    /// Re-serialize every kind touched during the batch into its reserved
    /// listing entry. Persistence failures land in the ledger; the batch's
    /// entity work is already committed.
    async fn persist_listings(
        &self,
        registry: &mut RegistryState,
        existing: &HashMap<String, crate::store::KnowledgeEntry>,
        outcome: &mut BatchOutcome,
    ) {
        let store = self.orchestrator.store();

        for kind in registry.take_dirty() {
            let name = listing_name(&kind);
            let block = registry.serialize_kind(&kind);

            let existing_id = existing
                .values()
                .find(|entry| entry.comment == name)
                .map(|entry| entry.id.clone());

            let result = match existing_id {
                Some(id) => {
                    store
                        .update(
                            &id,
                            EntryUpdate {
                                content: Some(block),
                                ..Default::default()
                            },
                        )
                        .await
                }
                None => store
                    .create(NewEntry {
                        comment: name.clone(),
                        content: block,
                        keywords: Vec::new(),
                        flags: EntryFlags {
                            always_active: false,
                            exclude_recursion: true,
                        },
                    })
                    .await
                    .map(|_| ()),
            };

            if let Err(e) = result {
                warn!(kind = %kind, error = %e, "failed to persist registry listing");
                outcome.failed.push(BatchFailure {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockClient;
    use crate::prompts::PromptSet;
    use crate::registry::listing_name;
    use crate::store::{KnowledgeStore, MemoryStore};
    use std::sync::Arc;

    fn obs(name: &str, kind: &str, content: &str) -> RawObservation {
        RawObservation {
            name: name.to_string(),
            content: content.to_string(),
            kind: Some(kind.to_string()),
            ..Default::default()
        }
    }

    fn lookup_plain(kind: &str) -> String {
        format!(
            r#"{{"type": "{}", "synopsis": "Seen in the narrative.", "sameEntityIds": [], "needsFullContextIds": []}}"#,
            kind
        )
    }

    // --- Scenario: dirty kinds are re-serialized at batch end ---

    #[tokio::test]
    async fn batch_persists_listing_entries_for_touched_kinds() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(
            MockClient::new()
                .with_response("lookup", lookup_plain("character"))
                .with_response("lookup", lookup_plain("location")),
        );
        let processor = BatchProcessor::new(Orchestrator::new(
            store.clone(),
            llm,
            PromptSet::passthrough(),
        ));

        let mut registry = RegistryState::ensure();
        let outcome = processor
            .run(
                &[
                    obs("Mira", "character", "A gray witch."),
                    obs("Ravenhall", "location", "A ruined keep."),
                ],
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        let entries = store.list().await.unwrap();
        let character_listing = entries
            .iter()
            .find(|e| e.comment == listing_name("character"))
            .expect("character listing entry");
        assert!(character_listing.content.contains("character-Mira"));
        assert!(entries
            .iter()
            .any(|e| e.comment == listing_name("location")));
    }

    // --- Scenario: a fresh session hydrates from persisted listings ---

    #[tokio::test]
    async fn empty_registry_hydrates_from_store_listings() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(
            MockClient::new()
                .with_response("lookup", lookup_plain("character"))
                .with_response("merge", r#"{"mergedContent": "Merged."}"#),
        );
        let processor = BatchProcessor::new(Orchestrator::new(
            store.clone(),
            llm,
            PromptSet::passthrough(),
        ));

        // First batch with a transient registry that is then dropped.
        let mut first = RegistryState::ensure();
        processor
            .run(&[obs("Mira", "character", "A gray witch.")], &mut first)
            .await
            .unwrap();
        drop(first);

        // Second batch starts from an empty transient registry; the merge
        // proves the record was rebuilt from the persisted listing.
        let llm2 = Arc::new(
            MockClient::new()
                .with_response("lookup", lookup_plain("character"))
                .with_response("merge", r#"{"mergedContent": "Merged."}"#),
        );
        let processor2 = BatchProcessor::new(Orchestrator::new(
            store.clone(),
            llm2,
            PromptSet::passthrough(),
        ));
        let mut second = RegistryState::ensure();
        let outcome = processor2
            .run(&[obs("Mira", "character", "Back again.")], &mut second)
            .await
            .unwrap();

        assert_eq!(outcome.merged.len(), 1);
        assert!(outcome.created.is_empty());
    }

    // --- Scenario: store failures land in the ledger, batch continues ---

    #[tokio::test]
    async fn create_failure_is_ledgered_and_batch_continues() {
        let store = Arc::new(MemoryStore::new().with_failing_creates());
        let llm = Arc::new(
            MockClient::new()
                .with_response("lookup", lookup_plain("character"))
                .with_response("lookup", lookup_plain("character")),
        );
        let processor = BatchProcessor::new(Orchestrator::new(
            store,
            llm,
            PromptSet::passthrough(),
        ));

        let mut registry = RegistryState::ensure();
        let outcome = processor
            .run(
                &[
                    obs("Mira", "character", "A gray witch."),
                    obs("Toren", "character", "A hunter."),
                ],
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.failed[0].name, "Mira");
        assert_eq!(outcome.failed[1].name, "Toren");
    }
}
