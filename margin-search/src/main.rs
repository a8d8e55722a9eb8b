use anyhow::Context;
use clap::{Parser, Subcommand};
use margin_context::{EntityRow, EntityType};
use margin_embed::{Embedder, FastEmbedProvider, HashEmbedder};
use margin_search::{
    EngineConfig, HybridResult, SearchEngine, SearchOptions, SearchResult, StaticEntitySource,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// A CLI tool to index and search margin entities.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the search database (overrides the config file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the deterministic hash embedder instead of downloading a model
    #[arg(long, global = true)]
    hash_embedder: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index entities from a JSON array of rows, then embed them
    Index {
        /// JSON file with `[{"id": ..., "type": ..., ...}]`
        file: PathBuf,
    },
    /// Remove an entity from the index
    Remove {
        /// Entity ID
        id: String,
    },
    /// Run a hybrid keyword + semantic query
    Search {
        /// Free-text query
        query: String,
        /// Maximum results per match type
        #[arg(short, long)]
        limit: Option<usize>,
        /// Restrict results to these entity types
        #[arg(short = 't', long = "type")]
        types: Vec<EntityType>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Rebuild the whole index from a JSON array of rows
    Reindex {
        /// JSON file with every current entity row
        file: PathBuf,
    },
    /// Show engine readiness and index size
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// Settings resolved before the engine takes ownership of the config.
struct Session {
    database: PathBuf,
    default_limit: usize,
    embedder: String,
}

#[derive(Serialize)]
struct StatusOutput {
    ready: bool,
    indexed_count: usize,
    keyword_documents: usize,
    embedder: String,
    database: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let embedder: Arc<dyn Embedder> = if args.hash_embedder {
        Arc::new(HashEmbedder::default())
    } else {
        Arc::new(FastEmbedProvider::new(config.embedding.clone()))
    };
    let session = Session {
        database: config.database_path(),
        default_limit: config.default_limit,
        embedder: embedder.provider_name().to_string(),
    };
    let engine = SearchEngine::open(config, embedder).await?;

    let outcome = run_command(&engine, args.command, &session).await;
    engine.shutdown().await;
    outcome
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config = config.with_data_dir(data_dir);
    }
    Ok(config)
}

fn load_rows(path: &Path) -> anyhow::Result<Vec<EntityRow>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid entity rows in {}", path.display()))
}

async fn run_command(
    engine: &SearchEngine,
    command: Commands,
    session: &Session,
) -> anyhow::Result<()> {
    match command {
        Commands::Index { file } => {
            let rows = load_rows(&file)?;
            engine.initialize_embedder().await?;
            for row in &rows {
                engine.index_entity(&row.id, &row.entity).await?;
            }
            engine.flush().await?;

            let stats = engine.queue_stats().await;
            println!(
                "Indexed {} entities ({} embedded, {} unchanged, {} failed)",
                rows.len(),
                stats.processed,
                stats.skipped,
                stats.failed
            );
            Ok(())
        }
        Commands::Remove { id } => {
            engine.remove_entity(&id).await?;
            println!("Removed {id}");
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            types,
            format,
        } => {
            engine.initialize_embedder().await?;
            let options =
                SearchOptions::new(limit.unwrap_or(session.default_limit)).with_entity_types(types);
            let results = engine.search(&query, &options).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Summary => print_results(&query, &results),
            }
            Ok(())
        }
        Commands::Reindex { file } => {
            let source = StaticEntitySource::new(load_rows(&file)?);
            engine.initialize_embedder().await?;

            let mut progress = |percent: u8| println!("Reindexing... {percent}%");
            let report = engine.reindex_all(&source, &mut progress).await?;
            println!(
                "Reindexed {} of {} entities in {} ms ({} failed)",
                report.indexed, report.total, report.elapsed_ms, report.failed
            );
            Ok(())
        }
        Commands::Status { format } => {
            engine.initialize_embedder().await?;
            let status = engine.get_status().await?;
            let output = StatusOutput {
                ready: status.ready,
                indexed_count: status.indexed_count,
                keyword_documents: engine.keyword_index().count().await?,
                embedder: session.embedder.clone(),
                database: session.database.clone(),
            };

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Summary => {
                    println!("Database: {}", output.database.display());
                    println!("Embedder: {}", output.embedder);
                    println!("Ready: {}", if output.ready { "Yes" } else { "No" });
                    println!("Embedded entities: {}", output.indexed_count);
                    println!("Keyword documents: {}", output.keyword_documents);
                }
            }
            Ok(())
        }
    }
}

fn print_results(query: &str, results: &HybridResult) {
    if results.is_empty() {
        println!("No results for {query:?}");
        return;
    }
    print_section("Keyword matches", &results.keyword);
    print_section("Semantic matches", &results.semantic);
}

fn print_section(heading: &str, results: &[SearchResult]) {
    println!("{heading} ({}):", results.len());
    for result in results {
        println!(
            "  [{}] {} | {} | score: {:.3}",
            result.entity_type, result.entity_id, result.title, result.score
        );
        if !result.preview.is_empty() && result.preview != result.title {
            println!("      {}", result.preview);
        }
    }
}
