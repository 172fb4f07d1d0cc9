//! End-to-end batch pipeline scenarios: intra-batch visibility, classifier
//! degradation, fatal configuration errors, and durable registry recovery.

use lorekeeper::{
    BatchProcessor, KnowledgeEntry, KnowledgeStore, MemoryStore, MockClient, Orchestrator,
    PromptSet, RawObservation, RegistryState, SqliteStore,
};
use std::sync::Arc;

fn obs(name: &str, kind: &str, content: &str) -> RawObservation {
    RawObservation {
        name: name.to_string(),
        content: content.to_string(),
        kind: Some(kind.to_string()),
        ..Default::default()
    }
}

fn lookup_plain() -> &'static str {
    r#"{"type": "character", "synopsis": "A gray witch.", "sameEntityIds": [], "needsFullContextIds": []}"#
}

fn merge_ok() -> &'static str {
    r#"{"mergedContent": "Merged narrative text."}"#
}

/// A knowledge entry named so the registry treats it as a listing block.
fn listing_entry(id: &str, kind: &str, lines: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        id: id.to_string(),
        comment: format!("lore-registry-{}", kind),
        content: format!("Known {} entries:\n{}", kind, lines),
        ..Default::default()
    }
}

fn entry(id: &str, comment: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        id: id.to_string(),
        comment: comment.to_string(),
        content: "Existing text.".to_string(),
        keywords: vec!["mira".to_string()],
        ..Default::default()
    }
}

// --- Scenario: intra-batch visibility — one record, not two ---

#[tokio::test]
async fn duplicate_observation_in_one_batch_merges_into_earlier_create() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(
        MockClient::new()
            .with_response("lookup", lookup_plain())
            .with_response("lookup", lookup_plain())
            .with_response("merge", merge_ok()),
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
                obs("Mira", "character", "A gray witch arrives."),
                obs("character-Mira", "character", "She speaks again."),
            ],
            &mut registry,
        )
        .await
        .unwrap();

    assert_eq!(outcome.created.len(), 1, "first observation creates");
    assert_eq!(outcome.merged.len(), 1, "second observation merges");
    assert!(outcome.failed.is_empty());
    assert_eq!(
        registry.records_of_kind("character").count(),
        1,
        "exactly one registry record for the duplicated entity"
    );
    assert_eq!(outcome.merged[0], outcome.created[0], "merge targets the in-batch create");
}

// --- Scenario: malformed classifier output never aborts an entity ---

#[tokio::test]
async fn malformed_classifier_json_falls_back_to_input_type() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(MockClient::new().with_response("lookup", "sorry, no JSON today"));
    let processor = BatchProcessor::new(Orchestrator::new(
        store.clone(),
        llm,
        PromptSet::passthrough(),
    ));

    let mut registry = RegistryState::ensure();
    let outcome = processor
        .run(&[obs("Ravenhall", "location", "A ruined keep.")], &mut registry)
        .await
        .expect("no exception may propagate from a malformed classifier response");

    assert_eq!(outcome.created.len(), 1);
    assert!(outcome.failed.is_empty(), "failure ledger unaffected");
    let record = registry.get(&outcome.created[0]).unwrap();
    assert_eq!(record.kind, "location", "falls back to the observation's kind");
}

// --- Scenario: missing resolver configuration is fatal when candidates exist ---

#[tokio::test]
async fn missing_resolver_template_aborts_batch_with_config_error() {
    // Two pre-existing records both matching "Mira" force a resolver call.
    let store = Arc::new(
        MemoryStore::new()
            .with_entry(entry("a1", "character-Mira"))
            .with_entry(entry("b2", "character-Toren"))
            .with_entry(listing_entry(
                "reg",
                "character",
                "1. id: a1 | name: character-Mira | aliases: | synopsis: A witch.\n\
                 2. id: b2 | name: character-Toren | aliases: Mira | synopsis: A hunter.",
            )),
    );
    let llm = Arc::new(MockClient::new().with_response("lookup", lookup_plain()));
    let prompts = PromptSet::default()
        .with_lookup("{{request}}")
        .with_merge("{{request}}");
    let processor = BatchProcessor::new(Orchestrator::new(store, llm, prompts));

    let mut registry = RegistryState::ensure();
    let err = processor
        .run(&[obs("Mira", "character", "Seen at dusk.")], &mut registry)
        .await
        .expect_err("missing resolver configuration must abort the batch");

    assert!(err.is_fatal());
    assert!(err.to_string().contains("resolve"), "message names the missing template: {}", err);
}

// --- Scenario: one deterministic candidate, no context flag — resolver skipped ---

#[tokio::test]
async fn single_candidate_merges_without_resolver_call() {
    let store = Arc::new(
        MemoryStore::new()
            .with_entry(entry("a1", "character-Mira"))
            .with_entry(listing_entry(
                "reg",
                "character",
                "1. id: a1 | name: character-Mira | aliases: | synopsis: A witch.",
            )),
    );
    let llm = Arc::new(
        MockClient::new()
            .with_response("lookup", lookup_plain())
            .with_response("merge", merge_ok()),
    );
    let processor = BatchProcessor::new(Orchestrator::new(
        store.clone(),
        llm.clone(),
        PromptSet::passthrough(),
    ));

    let mut registry = RegistryState::ensure();
    let outcome = processor
        .run(&[obs("Mira", "character", "Seen at dusk.")], &mut registry)
        .await
        .unwrap();

    assert_eq!(outcome.merged, vec!["a1".to_string()]);
    assert_eq!(
        llm.calls(),
        vec!["lookup".to_string(), "merge".to_string()],
        "resolver never invoked"
    );
    let merged = store.get("a1").await.unwrap().unwrap();
    assert_eq!(merged.content, "Merged narrative text.");
}

// --- Scenario: merge failure lands in the ledger without a stray create ---

#[tokio::test]
async fn merge_failure_is_ledgered_and_batch_continues() {
    let store = Arc::new(
        MemoryStore::new()
            .with_entry(entry("a1", "character-Mira"))
            .with_entry(listing_entry(
                "reg",
                "character",
                "1. id: a1 | name: character-Mira | aliases: | synopsis: A witch.",
            )),
    );
    let llm = Arc::new(
        MockClient::new()
            .with_response("lookup", lookup_plain())
            .with_failure("merge", "model refused")
            .with_response("lookup", lookup_plain()),
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
                obs("Mira", "character", "Seen at dusk."),
                obs("Toren", "character", "A hunter appears."),
            ],
            &mut registry,
        )
        .await
        .unwrap();

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].name, "Mira");
    assert_eq!(outcome.created.len(), 1, "the later observation still processes");
    assert_eq!(
        registry.records_of_kind("character").count(),
        2,
        "no create for the failed merge"
    );
}

// --- Scenario: registry survives loss of the transient copy (SQLite) ---

#[tokio::test]
async fn registry_recovers_from_sqlite_after_transient_loss() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lore.db");

    // First batch creates Mira and persists the listing.
    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let llm = Arc::new(MockClient::new().with_response("lookup", lookup_plain()));
        let processor = BatchProcessor::new(Orchestrator::new(
            store,
            llm,
            PromptSet::passthrough(),
        ));
        let mut registry = RegistryState::ensure();
        let outcome = processor
            .run(&[obs("Mira", "character", "A gray witch.")], &mut registry)
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 1);
    }

    // Fresh process, fresh transient registry: the second observation must
    // merge against the rehydrated record.
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let llm = Arc::new(
        MockClient::new()
            .with_response("lookup", lookup_plain())
            .with_response("merge", merge_ok()),
    );
    let processor = BatchProcessor::new(Orchestrator::new(
        store,
        llm,
        PromptSet::passthrough(),
    ));
    let mut registry = RegistryState::ensure();
    let outcome = processor
        .run(&[obs("Mira", "character", "Back again.")], &mut registry)
        .await
        .unwrap();

    assert_eq!(outcome.merged.len(), 1);
    assert!(outcome.created.is_empty());
}

// --- Scenario: provided id that no longer resolves is discarded ---

#[tokio::test]
async fn dangling_provided_id_creates_instead_of_failing() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(MockClient::new().with_response("lookup", lookup_plain()));
    let processor = BatchProcessor::new(Orchestrator::new(
        store,
        llm,
        PromptSet::passthrough(),
    ));

    let mut observation = obs("Mira", "character", "A gray witch.");
    observation.id = Some("entry-that-was-deleted".to_string());

    let mut registry = RegistryState::ensure();
    let outcome = processor.run(&[observation], &mut registry).await.unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert!(outcome.failed.is_empty());
}
