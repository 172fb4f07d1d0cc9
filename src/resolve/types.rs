//! Boundary types for the classifier and resolver responses.
//!
//! The external services answer in free text that should contain JSON.
//! Everything crossing that boundary is validated here and mapped onto
//! explicit result structs with documented defaults — a malformed response
//! never aborts an entity, it degrades to the fallback values.

use serde_json::Value;

/// Extract a JSON object from LLM response text.
///
/// Models sometimes wrap JSON in markdown code fences or add explanation
/// text. Tries, in order:
/// 1. Direct parse (response is pure JSON)
/// 2. Extract from ```json ... ``` or ``` ... ``` fenced block
/// 3. Find the first `{` to last `}` span and parse that
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn id_list_field(value: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|k| value.get(*k))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Classifier answer for one entity against the registry listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Kind the classifier assigned; `None` keeps the observation's kind.
    pub kind: Option<String>,
    pub synopsis: String,
    /// Ids the classifier is confident refer to this entity.
    pub same_entity_ids: Vec<String>,
    /// Ids the classifier wants full entry context for before deciding.
    pub needs_full_context_ids: Vec<String>,
}

impl LookupResult {
    /// The documented safe default: keep the observation's kind, no
    /// synopsis, no candidates. Used whenever the classifier is missing,
    /// malformed, or unreachable.
    pub fn fallback() -> Self {
        Self {
            kind: None,
            synopsis: String::new(),
            same_entity_ids: Vec::new(),
            needs_full_context_ids: Vec::new(),
        }
    }

    /// Parse a classifier response. Accepts camelCase and snake_case field
    /// names; anything unusable yields `None` (the caller substitutes the
    /// fallback).
    pub fn parse(text: &str) -> Option<Self> {
        let value = extract_json(text)?;
        Some(Self {
            kind: string_field(&value, &["type", "kind"]),
            synopsis: string_field(&value, &["synopsis", "summary"]).unwrap_or_default(),
            same_entity_ids: id_list_field(&value, &["sameEntityIds", "same_entity_ids"]),
            needs_full_context_ids: id_list_field(
                &value,
                &["needsFullContextIds", "needs_full_context_ids"],
            ),
        })
    }
}

/// Resolver answer for one entity against its candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    /// Merge target; `None` means "new entity".
    pub resolved_id: Option<String>,
    /// Other candidates the resolver marked as duplicates of the target.
    pub duplicate_ids: Vec<String>,
    pub synopsis: Option<String>,
}

impl ResolveResult {
    /// The documented safe default for a malformed resolver response:
    /// unresolved, carrying forward the lookup synopsis.
    pub fn fallback(lookup_synopsis: &str) -> Self {
        Self {
            resolved_id: None,
            duplicate_ids: Vec::new(),
            synopsis: Some(lookup_synopsis.to_string()).filter(|s| !s.is_empty()),
        }
    }

    /// Parse a resolver response. The sentinel id `"new"` (or null/absent)
    /// means no merge target.
    pub fn parse(text: &str) -> Option<Self> {
        let value = extract_json(text)?;
        let resolved_id = string_field(&value, &["resolvedId", "resolved_id"])
            .filter(|id| !id.eq_ignore_ascii_case("new"));
        Some(Self {
            resolved_id,
            duplicate_ids: id_list_field(&value, &["duplicateIds", "duplicate_ids"]),
            synopsis: string_field(&value, &["synopsis", "summary"]),
        })
    }
}

/// Merge-service answer: the combined content, optionally a new canonical
/// display name for the surviving entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub merged_content: String,
    pub canonical_name_override: Option<String>,
}

impl MergeResult {
    /// Parse a merge response. A response without usable merged content is
    /// a merge failure, not a fallback — the caller records it.
    pub fn parse(text: &str) -> Option<Self> {
        let value = extract_json(text)?;
        let merged_content = string_field(&value, &["mergedContent", "merged_content", "content"])?;
        Some(Self {
            merged_content,
            canonical_name_override: string_field(
                &value,
                &["canonicalNameOverride", "canonical_name_override", "rename"],
            ),
        })
    }
}

/// Read-only projection of a knowledge entry plus its registry record,
/// built only for ids under active consideration. Keeps the resolver
/// payload bounded: the whole registry is never materialized.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CandidateEntity {
    pub id: String,
    pub comment: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub aliases: Vec<String>,
    pub synopsis: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Scenario: lookup parsing ---

    #[test]
    fn lookup_parses_camel_case_response() {
        let result = LookupResult::parse(
            r#"{"type": "character", "synopsis": "A witch.",
                "sameEntityIds": ["a1"], "needsFullContextIds": ["b2"]}"#,
        )
        .unwrap();
        assert_eq!(result.kind.as_deref(), Some("character"));
        assert_eq!(result.synopsis, "A witch.");
        assert_eq!(result.same_entity_ids, vec!["a1".to_string()]);
        assert_eq!(result.needs_full_context_ids, vec!["b2".to_string()]);
    }

    #[test]
    fn lookup_parses_fenced_snake_case_response() {
        let result = LookupResult::parse(
            "Here you go:\n```json\n{\"kind\": \"location\", \"same_entity_ids\": []}\n```",
        )
        .unwrap();
        assert_eq!(result.kind.as_deref(), Some("location"));
        assert!(result.same_entity_ids.is_empty());
        assert!(result.synopsis.is_empty());
    }

    #[test]
    fn malformed_lookup_yields_none() {
        assert!(LookupResult::parse("not json at all").is_none());
        assert!(LookupResult::parse("[1, 2, 3]").is_none());
    }

    #[test]
    fn lookup_fallback_has_documented_defaults() {
        let fb = LookupResult::fallback();
        assert!(fb.kind.is_none());
        assert!(fb.synopsis.is_empty());
        assert!(fb.same_entity_ids.is_empty());
        assert!(fb.needs_full_context_ids.is_empty());
    }

    // --- Scenario: resolver parsing ---

    #[test]
    fn resolver_new_sentinel_means_unresolved() {
        let result =
            ResolveResult::parse(r#"{"resolvedId": "new", "duplicateIds": []}"#).unwrap();
        assert!(result.resolved_id.is_none());
    }

    #[test]
    fn resolver_id_and_duplicates_parse() {
        let result = ResolveResult::parse(
            r#"{"resolvedId": "a1", "duplicateIds": ["b2", "c3"], "synopsis": "Merged view."}"#,
        )
        .unwrap();
        assert_eq!(result.resolved_id.as_deref(), Some("a1"));
        assert_eq!(result.duplicate_ids.len(), 2);
        assert_eq!(result.synopsis.as_deref(), Some("Merged view."));
    }

    #[test]
    fn resolver_fallback_carries_lookup_synopsis() {
        let fb = ResolveResult::fallback("from lookup");
        assert!(fb.resolved_id.is_none());
        assert_eq!(fb.synopsis.as_deref(), Some("from lookup"));
        assert!(ResolveResult::fallback("").synopsis.is_none());
    }

    // --- Scenario: merge parsing ---

    #[test]
    fn merge_parses_content_and_optional_rename() {
        let result = MergeResult::parse(
            r#"{"mergedContent": "Combined text.", "canonicalNameOverride": "character-Mira of Ashfen"}"#,
        )
        .unwrap();
        assert_eq!(result.merged_content, "Combined text.");
        assert_eq!(
            result.canonical_name_override.as_deref(),
            Some("character-Mira of Ashfen")
        );
    }

    #[test]
    fn merge_without_content_is_a_failure() {
        assert!(MergeResult::parse(r#"{"canonicalNameOverride": "x"}"#).is_none());
        assert!(MergeResult::parse("nonsense").is_none());
    }

    // --- extract_json strategies ---

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let v = extract_json("Sure! The answer is {\"a\": 1} as requested.").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extract_json_rejects_non_objects() {
        assert!(extract_json("42").is_none());
        assert!(extract_json("\"string\"").is_none());
    }
}
