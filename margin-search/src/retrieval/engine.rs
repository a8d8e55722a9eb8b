//! The search engine facade.
//!
//! `SearchEngine` owns one SQLite database and wires the keyword index, the
//! vector store, the debounced embedding queue and the hybrid searcher to it.
//!
//! ```text
//! index_entity ─► extract ─► KeywordIndex::upsert (awaited)
//!                     └────► EmbeddingQueue::enqueue ─► (debounce) ─► VectorStore
//!
//! search ─► HybridSearch ─┬─► KeywordIndex
//!                         └─► Embedder + VectorStore
//!
//! reindex_all ─► flush queue ─► sweep gate (write) ─► clear ─► batches per type
//! ```
//!
//! Embedding is eventual: a freshly indexed entity is keyword-searchable as
//! soon as `index_entity` returns, and semantically searchable once its
//! debounce window has passed (or after `flush`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use margin_context::extract::{embeddable_text, extract};
use margin_context::{Entity, EntityRow, EntityType};
use margin_embed::Embedder;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::embedding_queue::{EmbeddingQueue, EntityEmbedder, QueueStats, SweepGate};
use super::hybrid::{HybridResult, HybridSearch, SearchOptions};
use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::storage::{Database, KeywordIndex, VectorStore};

/// Supplies entity snapshots for a full reindex.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Every current row of one entity type.
    async fn load(&self, entity_type: EntityType) -> Result<Vec<EntityRow>>;
}

/// An [`EntitySource`] over rows already held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticEntitySource {
    rows: Vec<EntityRow>,
}

impl StaticEntitySource {
    pub fn new(rows: Vec<EntityRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl EntitySource for StaticEntitySource {
    async fn load(&self, entity_type: EntityType) -> Result<Vec<EntityRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.entity.entity_type() == entity_type)
            .cloned()
            .collect())
    }
}

/// Receives reindex progress as an integer percentage.
pub trait ProgressSink: Send {
    fn report(&mut self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: FnMut(u8) + Send,
{
    fn report(&mut self, percent: u8) {
        self(percent)
    }
}

/// Discards progress reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u8) {}
}

/// Outcome of a full reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Rows handed over by the source
    pub total: usize,
    /// Rows written to both stores
    pub indexed: usize,
    /// Rows that failed in either store
    pub failed: usize,
    /// Entity types the source could not load
    pub source_errors: usize,
    pub elapsed_ms: u64,
}

/// Snapshot of engine readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// True when the embedding model is loaded and the engine is open
    pub ready: bool,
    /// Distinct entities with stored embeddings
    pub indexed_count: usize,
}

pub struct SearchEngine {
    config: EngineConfig,
    database: Database,
    keyword_index: KeywordIndex,
    vector_store: VectorStore,
    writer: EntityEmbedder,
    queue: EmbeddingQueue,
    hybrid: HybridSearch,
    sweep_gate: SweepGate,
    closed: AtomicBool,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("config", &self.config)
            .field("embedder", &self.writer.embedder().provider_name())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SearchEngine {
    /// Opens the database under `config.data_dir` and wires every component.
    pub async fn open(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let database = Database::open(&config.database_path()).await?;
        Self::assemble(config, database, embedder).await
    }

    /// Like [`SearchEngine::open`] but backed by a private in-memory database.
    pub async fn open_memory(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let database = Database::open_memory().await?;
        Self::assemble(config, database, embedder).await
    }

    async fn assemble(
        config: EngineConfig,
        database: Database,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let keyword_index = KeywordIndex::new(&database).await?;
        let vector_store = VectorStore::new(&database).await?;
        let sweep_gate: SweepGate = Arc::new(RwLock::new(()));

        let writer = EntityEmbedder::new(
            Arc::clone(&embedder),
            vector_store.clone(),
            config.chunk,
        );
        let queue = EmbeddingQueue::new(writer.clone(), Arc::clone(&sweep_gate), config.debounce());
        let hybrid = HybridSearch::new(keyword_index.clone(), vector_store.clone(), embedder);

        info!(
            "Search engine ready (embedder: {}, debounce: {:?})",
            writer.embedder().provider_name(),
            config.debounce()
        );

        Ok(Self {
            config,
            database,
            keyword_index,
            vector_store,
            writer,
            queue,
            hybrid,
            sweep_gate,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::not_initialized("search engine has been shut down"));
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn keyword_index(&self) -> &KeywordIndex {
        &self.keyword_index
    }

    pub fn vector_store(&self) -> &VectorStore {
        &self.vector_store
    }

    /// Loads the embedding model if it is not loaded yet.
    pub async fn initialize_embedder(&self) -> Result<()> {
        self.ensure_open()?;
        self.writer.embedder().initialize().await?;
        Ok(())
    }

    /// Index one entity snapshot.
    ///
    /// The keyword document is written before this returns; the embedding is
    /// queued and written after the debounce delay.
    pub async fn index_entity(&self, entity_id: &str, entity: &Entity) -> Result<()> {
        self.ensure_open()?;
        let entity_type = entity.entity_type();
        let content = extract(entity);

        self.keyword_index
            .upsert(entity_id, entity_type, &content.title, &content.body)
            .await?;
        self.queue
            .enqueue(entity_id, entity_type, embeddable_text(entity))
            .await?;

        debug!("Indexed {entity_type}:{entity_id}");
        Ok(())
    }

    /// Drop an entity from both stores and cancel its pending embedding.
    pub async fn remove_entity(&self, entity_id: &str) -> Result<()> {
        self.ensure_open()?;
        let had_document = self.keyword_index.remove(entity_id).await?;
        let chunks = self.queue.remove_entity(entity_id).await?;
        debug!("Removed {entity_id} (keyword: {had_document}, chunks: {chunks})");
        Ok(())
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<HybridResult> {
        self.ensure_open()?;
        Ok(self.hybrid.search(query, options).await)
    }

    /// Rebuild both stores from `source`.
    ///
    /// Pending queue jobs are flushed first. The sweep then holds the sweep
    /// gate exclusively, so queue jobs and other sweeps wait until it ends.
    /// Per-entity failures are logged and counted without stopping the sweep.
    pub async fn reindex_all(
        &self,
        source: &dyn EntitySource,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReindexReport> {
        self.ensure_open()?;
        if !self.writer.embedder().is_initialized() {
            return Err(SearchError::not_initialized(
                "embedding model must be initialized before a full reindex",
            ));
        }

        self.queue.flush().await;
        let _sweep = self.sweep_gate.write().await;
        let started = Instant::now();
        info!("Starting full reindex");

        self.keyword_index.clear().await?;
        self.vector_store.clear().await?;

        let mut report = ReindexReport::default();
        let mut loaded = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            match source.load(entity_type).await {
                Ok(rows) => {
                    debug!("Loaded {} {entity_type} row(s)", rows.len());
                    report.total += rows.len();
                    loaded.push(rows);
                }
                Err(e) => {
                    error!("Failed to load {entity_type} entities: {e}");
                    report.source_errors += 1;
                }
            }
        }

        let batch_size = self.config.reindex_batch_size.max(1);
        let mut processed = 0usize;
        for rows in &loaded {
            for batch in rows.chunks(batch_size) {
                for row in batch {
                    match self.reindex_row(row).await {
                        Ok(()) => report.indexed += 1,
                        Err(e) => {
                            error!("Failed to reindex {}: {e}", row.id);
                            report.failed += 1;
                        }
                    }
                }
                processed += batch.len();
                progress.report(percent(processed, report.total));
            }
        }
        if report.total == 0 {
            progress.report(100);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Reindex finished: {} indexed, {} failed, {} ms",
            report.indexed, report.failed, report.elapsed_ms
        );
        Ok(report)
    }

    async fn reindex_row(&self, row: &EntityRow) -> Result<()> {
        let entity_type = row.entity.entity_type();
        let content = extract(&row.entity);
        self.keyword_index
            .upsert(&row.id, entity_type, &content.title, &content.body)
            .await?;
        self.writer
            .embed_entity(&row.id, entity_type, &embeddable_text(&row.entity))
            .await?;
        Ok(())
    }

    pub async fn get_status(&self) -> Result<EngineStatus> {
        let open = !self.closed.load(Ordering::SeqCst);
        let indexed_count = if open { self.vector_store.count().await? } else { 0 };
        Ok(EngineStatus {
            ready: open && self.writer.embedder().is_initialized(),
            indexed_count,
        })
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub async fn pending_embeddings(&self) -> usize {
        self.queue.pending_count().await
    }

    /// Embed everything still waiting in the queue now.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.queue.flush().await;
        Ok(())
    }

    /// Flush pending work, stop the queue and close the database.
    ///
    /// Later calls return [`SearchError::NotInitialized`]. Shutting down twice
    /// is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down search engine");
        self.queue.flush().await;
        self.queue.destroy().await;
        self.database.close().await;
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
