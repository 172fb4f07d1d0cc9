//! Deterministic matcher — name and alias matching over the registry.
//!
//! Runs on every resolution, independent of the probabilistic classifier.
//! This is the safety net that keeps obvious duplicates from slipping
//! through when the classifier under-calls: an exact name hit must always
//! reach the resolver, whether or not the classifier noticed it.

use crate::entity::NormalizedEntity;
use crate::keywords::canonical_stub;
use crate::registry::RegistryState;

/// Candidate ids whose records deterministically match the entity.
///
/// Matching is restricted to records of the same kind, in three forms:
/// exact display-name equality, stub equality (display name minus kind
/// prefix, lowercased), and stub equality against any alias.
pub fn prematch(entity: &NormalizedEntity, registry: &RegistryState) -> Vec<String> {
    let stub = entity.stub();
    let mut candidates = Vec::new();

    for record in registry.records_of_kind(&entity.kind) {
        let name_match = record.name.eq_ignore_ascii_case(&entity.comment);
        let stub_match = !stub.is_empty() && canonical_stub(&record.name, &record.kind) == stub;
        let alias_match = !stub.is_empty()
            && record
                .aliases
                .iter()
                .any(|alias| canonical_stub(alias, &record.kind) == stub);

        if name_match || stub_match || alias_match {
            candidates.push(record.id.clone());
        }
    }

    candidates
}
