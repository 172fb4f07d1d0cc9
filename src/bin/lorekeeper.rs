//! Lorekeeper CLI — entity resolution against a SQLite knowledge store.
//!
//! Usage:
//!   lorekeeper process <batch.json> --llm-cmd <program> [--prompts dir] [--db path]
//!   lorekeeper registry show [--db path]

use clap::{Parser, Subcommand};
use lorekeeper::{
    BatchProcessor, CommandClient, Orchestrator, PromptSet, RawObservation, RegistryState,
    SqliteStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "lorekeeper",
    version,
    about = "Entity resolution and registry synchronization for narrative knowledge bases"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a batch of entity observations
    Process {
        /// Path to a JSON file containing an array of observations
        file: PathBuf,
        /// Command to run for LLM tasks (receives the task name as its
        /// last argument and the payload on stdin)
        #[arg(long)]
        llm_cmd: String,
        /// Extra arguments passed to the LLM command before the task name
        #[arg(long)]
        llm_arg: Vec<String>,
        /// Directory containing lookup.txt, resolve.txt, merge.txt templates
        #[arg(long)]
        prompts: Option<PathBuf>,
        /// The player character's name (marks their entry always-active)
        #[arg(long)]
        player: Option<String>,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Inspect the persisted registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
        /// Path to SQLite database file
        #[arg(long, global = true)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Print the serialized registry listing
    Show,
}

/// Get the default database path (~/.local/share/lorekeeper/lore.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let lore_dir = data_dir.join("lorekeeper");
    std::fs::create_dir_all(&lore_dir).ok();
    lore_dir.join("lore.db")
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    let store =
        SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

/// Load prompt templates from a directory. Missing files leave the
/// corresponding template unset, which the pipeline treats per its
/// documented absence policy.
fn load_prompts(dir: Option<&Path>) -> PromptSet {
    let Some(dir) = dir else {
        return PromptSet::passthrough();
    };
    let read = |name: &str| std::fs::read_to_string(dir.join(name)).ok();
    PromptSet {
        lookup: read("lookup.txt"),
        resolve: read("resolve.txt"),
        merge: read("merge.txt"),
    }
}

async fn cmd_process(
    file: &Path,
    llm_cmd: &str,
    llm_args: Vec<String>,
    prompts: Option<&Path>,
    player: Option<String>,
    db: Option<PathBuf>,
) -> i32 {
    let raw = match std::fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    let observations: Vec<RawObservation> = match serde_json::from_str(&raw) {
        Ok(observations) => observations,
        Err(e) => {
            eprintln!("Error: '{}' is not a valid observation batch: {}", file.display(), e);
            return 1;
        }
    };

    let store = match open_store(db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let llm = Arc::new(CommandClient::new(llm_cmd).with_args(llm_args));
    let mut orchestrator = Orchestrator::new(store, llm, load_prompts(prompts));
    if let Some(player) = player {
        orchestrator = orchestrator.with_player_name(player);
    }
    let processor = BatchProcessor::new(orchestrator);

    let mut registry = RegistryState::ensure();
    match processor.run(&observations, &mut registry).await {
        Ok(outcome) => {
            println!(
                "Batch complete: {} created, {} merged, {} failed",
                outcome.created.len(),
                outcome.merged.len(),
                outcome.failed.len()
            );
            for failure in &outcome.failed {
                eprintln!("Warning: '{}' failed: {}", failure.name, failure.reason);
            }
            if outcome.failed.is_empty() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_registry_show(db: Option<PathBuf>) -> i32 {
    let store = match open_store(db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let entries = match lorekeeper::KnowledgeStore::list(store.as_ref()).await {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut registry = RegistryState::ensure();
    registry.hydrate(&entries);
    println!("{}", registry.serialize());
    0
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Process {
            file,
            llm_cmd,
            llm_arg,
            prompts,
            player,
            db,
        } => {
            cmd_process(
                &file,
                &llm_cmd,
                llm_arg,
                prompts.as_deref(),
                player,
                db,
            )
            .await
        }
        Commands::Registry { action, db } => match action {
            RegistryAction::Show => cmd_registry_show(db).await,
        },
    };
    std::process::exit(code);
}
