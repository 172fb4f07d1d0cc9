//! Lorekeeper: Entity Resolution & Registry Synchronization
//!
//! Keeps a durable, deduplicated knowledge base of narrative entities
//! (characters, locations, items, factions) up to date across incremental
//! updates. Given one new entity observation, the pipeline decides whether
//! it refers to an entity already known to the system, merges into it, or
//! creates a new one — and keeps a compact, recoverable registry consistent
//! with the underlying knowledge store.
//!
//! # Core Concepts
//!
//! - **Knowledge store**: external CRUD repository of keyword-triggered
//!   text entries, reached through the [`KnowledgeStore`] trait
//! - **Registry**: compact index of known entities layered over the store,
//!   serialized into it as plain-text listing blocks for recovery
//! - **Batch**: an ordered set of observations from one unit of narrative
//!   text, processed strictly sequentially so entities created early in a
//!   batch are matchable later in the same batch
//!
//! # Example
//!
//! ```no_run
//! use lorekeeper::{
//!     BatchProcessor, CommandClient, Orchestrator, PromptSet, RegistryState, SqliteStore,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("lore.db")?);
//! let llm = Arc::new(CommandClient::new("lore-llm"));
//! let orchestrator = Orchestrator::new(store, llm, PromptSet::passthrough());
//! let processor = BatchProcessor::new(orchestrator);
//!
//! let mut registry = RegistryState::ensure();
//! let outcome = processor.run(&[], &mut registry).await?;
//! println!("created {} merged {}", outcome.created.len(), outcome.merged.len());
//! # Ok(())
//! # }
//! ```

mod batch;
mod engine;
pub mod entity;
pub mod keywords;
pub mod kind;
mod llm;
mod matcher;
pub mod prompts;
pub mod registry;
pub mod resolve;
pub mod store;

pub use batch::{BatchFailure, BatchOutcome, BatchProcessor};
pub use engine::LoreEngine;
pub use entity::{normalize, NormalizedEntity, RawObservation};
pub use keywords::refine_keywords;
pub use kind::{EntityKind, EntryFlags, KindTable};
pub use llm::{CommandClient, LlmClient, LlmError, MockClient};
pub use matcher::prematch;
pub use prompts::{MissingTemplate, PromptSet};
pub use registry::{RegistryRecord, RegistryState};
pub use resolve::{Orchestrator, Resolution, ResolveError};
pub use store::{
    EntryUpdate, KnowledgeEntry, KnowledgeStore, MemoryStore, NewEntry, SqliteStore, StoreError,
    StoreResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
