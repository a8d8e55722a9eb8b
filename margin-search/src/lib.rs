//! margin-search: local hybrid search over personal knowledge entities
//!
//! Tasks, notes, meetings, projects and stakeholders are indexed twice: once
//! in an FTS5 keyword index and once as embedding vectors. A query runs both
//! paths concurrently and returns the keyword hits alongside the semantic hits
//! that the keyword path missed.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Engine facade, debounced embedding queue and hybrid search
//! - **[`storage`]**: SQLite keyword index and vector store
//! - **[`config`]**: Engine configuration loaded from TOML or built in code
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use margin_context::{Entity, entity::Task};
//! use margin_embed::HashEmbedder;
//! use margin_search::{EngineConfig, SearchEngine, SearchOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = SearchEngine::open(EngineConfig::new(".margin"), Arc::new(HashEmbedder::default())).await?;
//! engine.initialize_embedder().await?;
//!
//! let task = Entity::Task(Task {
//!     title: "Buy groceries".to_string(),
//!     description: Some("Pick up milk and eggs".to_string()),
//! });
//! engine.index_entity("t1", &task).await?;
//!
//! let results = engine.search("groceries", &SearchOptions::default()).await?;
//! println!("{} keyword hit(s)", results.keyword.len());
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Entity ─► Extractor ─► KeywordIndex ◄──────────┐
//!    └────► EmbeddingQueue ─► Chunker ─► Embedder ─► VectorStore
//!                                                │      │
//!                          query ─► HybridSearch ┴──────┘
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use config::EngineConfig;
pub use error::{Result, SearchError};
pub use retrieval::embedding_queue::{EmbeddingQueue, QueueStats};
pub use retrieval::engine::{
    EngineStatus, EntitySource, NoProgress, ProgressSink, ReindexReport, SearchEngine,
    StaticEntitySource,
};
pub use retrieval::hybrid::{HybridResult, HybridSearch, SearchOptions};
pub use storage::{MatchType, SearchResult};
