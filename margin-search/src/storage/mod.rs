//! Storage layer for the margin search engine
//!
//! Both indexes live in one SQLite database opened once per process:
//!
//! ```text
//! Database (SqlitePool, WAL)
//!   ├─ search_index  FTS5 virtual table   ── KeywordIndex
//!   └─ embeddings    f16 vector blobs     ── VectorStore
//! ```
//!
//! The database is a derived index. Entity records themselves belong to the
//! host application and are only ever handed to the engine as snapshots.

use crate::error::Result;
use chrono::{DateTime, Utc};
use half::f16;
use margin_context::EntityType;
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod keyword_index;
pub mod vector_store;

pub use keyword_index::KeywordIndex;
pub use vector_store::{SimilarChunk, VectorStore, cosine_similarity};

/// Which retrieval path produced a result. Scores are only comparable within
/// one match type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Keyword,
    Semantic,
}

/// One search hit, keyword or semantic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub title: String,
    pub preview: String,
    pub score: f32,
    pub match_type: MatchType,
}

/// The full-text document stored for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordDocument {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub title: String,
    pub body: String,
}

/// One embedded chunk of an entity.
///
/// `id` is `None` until the record has been written. Chunks of an entity are
/// numbered contiguously from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: Option<i64>,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub chunk_index: usize,
    pub content_hash: String,
    pub text_preview: String,
    pub vector: Vec<f16>,
    pub created_at: DateTime<Utc>,
}

/// Handle to the shared SQLite database.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("Opening search database at {}", path.display());
        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(path)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5))
                    .create_if_missing(true)
                    .optimize_on_close(true, 1 << 10),
            )
            .await?;
        Ok(Self { pool })
    }

    /// Opens a private in-memory database, mostly for tests.
    ///
    /// Every SQLite connection to `:memory:` sees its own database, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn parse_entity_type(value: &str) -> Result<EntityType> {
    EntityType::from_str(value).map_err(|message| {
        crate::error::SearchError::IndexCorruption {
            source: sqlx::Error::Decode(message.into()),
        }
    })
}
