//! Resolution orchestrator — decides merge-target or "new" for one entity.
//!
//! Drives the lookup → pre-match → resolve → merge-or-create state machine:
//!
//! 1. Provided-id fast path: a caller-supplied id that still resolves skips
//!    lookup and resolution entirely.
//! 2. Lookup: the external classifier sees the normalized entity and the
//!    serialized registry listing. Malformed output degrades to documented
//!    defaults; the entity is never aborted here.
//! 3. Pre-match: deterministic matcher ids unioned with the classifier's
//!    proposals, filtered to live registry ids.
//! 4. Resolve: candidates go to the external resolver — unless exactly one
//!    candidate exists and the classifier didn't flag it as needing full
//!    context, in which case it auto-resolves without a call.
//! 5. Merge or create, with immediate registration of new ids in the
//!    in-batch working set so later observations can match against them.
//!
//! Missing resolver/merge *configuration* is fatal (no safe default exists
//! for "do nothing"); malformed *responses* and store mutation failures are
//! per-entity errors the batch records and moves past.

mod types;

pub use types::{CandidateEntity, LookupResult, MergeResult, ResolveResult};

use crate::entity::{normalize, NormalizedEntity, RawObservation};
use crate::kind::KindTable;
use crate::llm::LlmClient;
use crate::matcher::prematch;
use crate::prompts::{render, MissingTemplate, PromptSet};
use crate::registry::{RegistryRecord, RegistryState};
use crate::store::{EntryUpdate, KnowledgeEntry, KnowledgeStore, NewEntry, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from resolving one entity.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Required prompt template missing — fatal, aborts the whole batch.
    #[error(transparent)]
    Config(#[from] MissingTemplate),

    /// A knowledge-store mutation failed for this entity.
    #[error("store operation failed for '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    /// The merge collaborator failed or answered unusably. Recorded, and
    /// deliberately *not* followed by a create — the candidate was real.
    #[error("merge failed for '{name}': {detail}")]
    Merge { name: String, detail: String },
}

impl ResolveError {
    /// Fatal errors abort the batch; everything else lands in the ledger.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Terminal state of one entity's resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Created { id: String },
    Merged { id: String },
}

impl Resolution {
    pub fn id(&self) -> &str {
        match self {
            Self::Created { id } | Self::Merged { id } => id,
        }
    }
}

/// The resolution orchestrator. One instance serves a whole batch; all
/// per-entity state is threaded through the call.
pub struct Orchestrator {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LlmClient>,
    prompts: PromptSet,
    kinds: KindTable,
    player_name: Option<String>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn KnowledgeStore>, llm: Arc<dyn LlmClient>, prompts: PromptSet) -> Self {
        Self {
            store,
            llm,
            prompts,
            kinds: KindTable::default(),
            player_name: None,
        }
    }

    pub fn with_kinds(mut self, kinds: KindTable) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = Some(name.into());
        self
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Resolve one observation against the registry and the in-batch
    /// working set of existing entries.
    pub async fn resolve_observation(
        &self,
        obs: &RawObservation,
        registry: &mut RegistryState,
        existing: &mut HashMap<String, KnowledgeEntry>,
    ) -> Result<Resolution, ResolveError> {
        // Provided-id fast path.
        if let Some(id) = obs.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(record) = registry.get(id).filter(|_| existing.contains_key(id)).cloned() {
                let entity = normalize(
                    obs,
                    &self.kinds,
                    Some(&record.kind),
                    self.player_name.as_deref(),
                );
                let synopsis = record.synopsis.clone();
                return self
                    .merge_into(id, &entity, Some(synopsis), &[], registry, existing)
                    .await;
            }
            warn!(id, name = %obs.name, "provided id does not resolve to a live entry; discarding");
        }

        // Lookup against the registry listing.
        let prelim = normalize(obs, &self.kinds, None, self.player_name.as_deref());
        let lookup = self.lookup(&prelim, registry).await;

        // Final kind: classifier's answer when recognized, else the
        // observation's, else the table's fallback.
        let kind_name = lookup.kind.as_deref().or(obs.kind.as_deref()).unwrap_or("");
        let entity = normalize(
            obs,
            &self.kinds,
            Some(kind_name),
            self.player_name.as_deref(),
        );

        // Pre-match union: deterministic matcher ∪ classifier proposals,
        // filtered to ids that exist in the registry.
        let mut candidates = prematch(&entity, registry);
        for id in lookup
            .same_entity_ids
            .iter()
            .chain(lookup.needs_full_context_ids.iter())
        {
            if registry.contains(id) && !candidates.contains(id) {
                candidates.push(id.clone());
            }
        }

        if candidates.is_empty() {
            return self
                .create(&entity, lookup.synopsis.clone(), registry, existing)
                .await;
        }

        let resolved = self
            .resolve_candidates(&entity, &lookup, &candidates, registry, existing)
            .await?;

        // A resolved id must still be live; a stale answer means unresolved.
        let target = resolved
            .resolved_id
            .as_deref()
            .filter(|id| registry.contains(id));
        if resolved.resolved_id.is_some() && target.is_none() {
            warn!(
                name = %entity.comment,
                "resolver returned an id not present in the registry; treating as unresolved"
            );
        }

        match target {
            Some(target) => {
                let target = target.to_string();
                let synopsis = resolved
                    .synopsis
                    .clone()
                    .or_else(|| Some(lookup.synopsis.clone()).filter(|s| !s.is_empty()));
                self.merge_into(
                    &target,
                    &entity,
                    synopsis,
                    &resolved.duplicate_ids,
                    registry,
                    existing,
                )
                .await
            }
            None => {
                self.create(&entity, lookup.synopsis.clone(), registry, existing)
                    .await
            }
        }
    }

    /// Invoke the classifier. Every failure mode degrades to the fallback
    /// result — a broken classifier must not block entity processing.
    async fn lookup(&self, entity: &NormalizedEntity, registry: &RegistryState) -> LookupResult {
        let Some(template) = self.prompts.lookup.as_deref() else {
            debug!("no lookup template configured; skipping classifier");
            return LookupResult::fallback();
        };

        let entity_value = serde_json::json!({
            "name": entity.comment,
            "kind": entity.kind,
            "content": entity.content,
            "keywords": entity.keywords,
        });
        let entity_json = entity_value.to_string();
        let listing = registry.serialize();
        let request = serde_json::json!({
            "entity": entity_value,
            "registryListing": listing,
        })
        .to_string();
        let payload = render(
            template,
            &[
                ("request", request.as_str()),
                ("entity", entity_json.as_str()),
                ("registry", listing.as_str()),
            ],
        );

        match self.llm.invoke("lookup", &payload).await {
            Ok(response) => LookupResult::parse(&response).unwrap_or_else(|| {
                warn!(name = %entity.comment, "malformed classifier response; using fallback defaults");
                LookupResult::fallback()
            }),
            Err(e) => {
                warn!(name = %entity.comment, error = %e, "classifier invocation failed; using fallback defaults");
                LookupResult::fallback()
            }
        }
    }

    /// Invoke the resolver over the candidate set, or auto-resolve when a
    /// single candidate needs no full context.
    async fn resolve_candidates(
        &self,
        entity: &NormalizedEntity,
        lookup: &LookupResult,
        candidates: &[String],
        registry: &RegistryState,
        existing: &HashMap<String, KnowledgeEntry>,
    ) -> Result<ResolveResult, ResolveError> {
        if candidates.len() == 1 && !lookup.needs_full_context_ids.contains(&candidates[0]) {
            debug!(name = %entity.comment, candidate = %candidates[0], "single candidate; auto-resolving");
            return Ok(ResolveResult {
                resolved_id: Some(candidates[0].clone()),
                duplicate_ids: Vec::new(),
                synopsis: Some(lookup.synopsis.clone()).filter(|s| !s.is_empty()),
            });
        }

        // Missing configuration is fatal here: no sane default exists for
        // picking between live candidates.
        let template = self.prompts.require_resolve()?;

        let projections: Vec<CandidateEntity> = candidates
            .iter()
            .filter_map(|id| {
                let record = registry.get(id)?;
                let entry = existing.get(id)?;
                Some(CandidateEntity {
                    id: id.clone(),
                    comment: entry.comment.clone(),
                    content: entry.content.clone(),
                    keywords: entry.keywords.clone(),
                    aliases: record.aliases.clone(),
                    synopsis: record.synopsis.clone(),
                })
            })
            .collect();

        let candidates_value = serde_json::to_value(&projections)
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
        let candidates_json = candidates_value.to_string();
        let entity_value = serde_json::json!({
            "name": entity.comment,
            "kind": entity.kind,
            "content": entity.content,
        });
        let entity_json = entity_value.to_string();
        let request = serde_json::json!({
            "entity": entity_value,
            "lookupSynopsis": lookup.synopsis,
            "candidates": candidates_value,
        })
        .to_string();
        let payload = render(
            template,
            &[
                ("request", request.as_str()),
                ("entity", entity_json.as_str()),
                ("synopsis", lookup.synopsis.as_str()),
                ("candidates", candidates_json.as_str()),
            ],
        );

        match self.llm.invoke("resolve", &payload).await {
            Ok(response) => Ok(ResolveResult::parse(&response).unwrap_or_else(|| {
                warn!(name = %entity.comment, "malformed resolver response; treating as unresolved");
                ResolveResult::fallback(&lookup.synopsis)
            })),
            Err(e) => {
                warn!(name = %entity.comment, error = %e, "resolver invocation failed; treating as unresolved");
                Ok(ResolveResult::fallback(&lookup.synopsis))
            }
        }
    }

    /// Merge the entity into an existing entry and synchronize the registry
    /// record. Duplicate ids reported by the resolver are absorbed into the
    /// surviving record.
    async fn merge_into(
        &self,
        target_id: &str,
        entity: &NormalizedEntity,
        synopsis: Option<String>,
        duplicate_ids: &[String],
        registry: &mut RegistryState,
        existing: &mut HashMap<String, KnowledgeEntry>,
    ) -> Result<Resolution, ResolveError> {
        let template = self.prompts.require_merge()?;

        let entry = existing
            .get(target_id)
            .cloned()
            .ok_or_else(|| ResolveError::Merge {
                name: entity.comment.clone(),
                detail: format!("merge target '{}' has no live entry", target_id),
            })?;

        let request = serde_json::json!({
            "existingEntry": {
                "comment": entry.comment,
                "content": entry.content,
            },
            "newContent": entity.content,
        })
        .to_string();
        let payload = render(
            template,
            &[
                ("request", request.as_str()),
                ("existing", entry.content.as_str()),
                ("content", entity.content.as_str()),
            ],
        );

        let response = self
            .llm
            .invoke("merge", &payload)
            .await
            .map_err(|e| ResolveError::Merge {
                name: entity.comment.clone(),
                detail: e.to_string(),
            })?;
        let merge = MergeResult::parse(&response).ok_or_else(|| ResolveError::Merge {
            name: entity.comment.clone(),
            detail: "no usable merged content in response".to_string(),
        })?;

        let record = registry.get(target_id).cloned().unwrap_or(RegistryRecord {
            id: target_id.to_string(),
            kind: entity.kind.clone(),
            name: entry.comment.clone(),
            aliases: Vec::new(),
            synopsis: String::new(),
        });

        let new_name = merge
            .canonical_name_override
            .clone()
            .unwrap_or_else(|| record.name.clone());
        let renamed = new_name != entry.comment;

        // Merged keyword set: refine over the union so the cap and the
        // stub-retention invariant hold for the surviving entry too.
        let mut raw_terms = entry.keywords.clone();
        for keyword in &entity.keywords {
            if !raw_terms.contains(keyword) {
                raw_terms.push(keyword.clone());
            }
        }
        let keywords = crate::keywords::refine_keywords(&raw_terms, &new_name, &record.kind);

        self.store
            .update(
                target_id,
                EntryUpdate {
                    comment: renamed.then(|| new_name.clone()),
                    content: Some(merge.merged_content.clone()),
                    keywords: Some(keywords.clone()),
                    flags: None,
                },
            )
            .await
            .map_err(|e| ResolveError::Store {
                name: entity.comment.clone(),
                source: e,
            })?;

        let mut updated = record;
        let old_name = std::mem::replace(&mut updated.name, new_name.clone());
        if renamed && old_name != new_name && !updated.aliases.contains(&old_name) {
            updated.aliases.push(old_name);
        }
        if entity.comment != new_name && !updated.aliases.contains(&entity.comment) {
            updated.aliases.push(entity.comment.clone());
        }
        if let Some(synopsis) = synopsis.filter(|s| !s.is_empty()) {
            updated.synopsis = synopsis;
        }
        if updated.kind != entity.kind {
            registry.mark_dirty(&updated.kind);
            updated.kind = entity.kind.clone();
        }
        registry.update(target_id, updated);

        if let Some(live) = existing.get_mut(target_id) {
            live.comment = new_name.clone();
            live.content = merge.merged_content;
            live.keywords = keywords;
        }

        if renamed {
            // Canonical ordering keys off the display name.
            if let Err(e) = self.store.reorder_canonically().await {
                warn!(error = %e, "canonical reorder after rename failed");
            }
        }

        self.absorb_duplicates(target_id, duplicate_ids, registry, existing)
            .await;

        Ok(Resolution::Merged {
            id: target_id.to_string(),
        })
    }

    /// Consolidate resolver-reported duplicates into the surviving record:
    /// names become aliases, the duplicate entries and records go away.
    /// No orphaned ids may remain afterwards.
    async fn absorb_duplicates(
        &self,
        target_id: &str,
        duplicate_ids: &[String],
        registry: &mut RegistryState,
        existing: &mut HashMap<String, KnowledgeEntry>,
    ) {
        for dup_id in duplicate_ids {
            if dup_id == target_id {
                continue;
            }
            let Some(removed) = registry.remove(dup_id) else {
                continue;
            };
            if let Some(mut survivor) = registry.get(target_id).cloned() {
                for alias in std::iter::once(removed.name.clone()).chain(removed.aliases) {
                    if alias != survivor.name && !survivor.aliases.contains(&alias) {
                        survivor.aliases.push(alias);
                    }
                }
                registry.update(target_id, survivor);
            }
            existing.remove(dup_id);
            if let Err(e) = self.store.delete(dup_id).await {
                warn!(id = %dup_id, error = %e, "failed to delete absorbed duplicate entry");
            }
        }
    }

    /// Create a fresh entry and register it immediately in both the
    /// registry and the in-batch working set, so later observations in the
    /// same batch can match against it.
    async fn create(
        &self,
        entity: &NormalizedEntity,
        synopsis: String,
        registry: &mut RegistryState,
        existing: &mut HashMap<String, KnowledgeEntry>,
    ) -> Result<Resolution, ResolveError> {
        let id = self
            .store
            .create(NewEntry {
                comment: entity.comment.clone(),
                content: entity.content.clone(),
                keywords: entity.keywords.clone(),
                flags: entity.flags,
            })
            .await
            .map_err(|e| ResolveError::Store {
                name: entity.comment.clone(),
                source: e,
            })?;

        registry.update(
            &id,
            RegistryRecord {
                id: id.clone(),
                kind: entity.kind.clone(),
                name: entity.comment.clone(),
                aliases: Vec::new(),
                synopsis,
            },
        );

        existing.insert(
            id.clone(),
            KnowledgeEntry {
                id: id.clone(),
                comment: entity.comment.clone(),
                content: entity.content.clone(),
                keywords: entity.keywords.clone(),
                flags: entity.flags,
                created_at: None,
            },
        );

        Ok(Resolution::Created { id })
    }
}
