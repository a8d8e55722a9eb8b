//! Debounced, content-addressed embedding pipeline.
//!
//! Entities are embedded some time after they change rather than on every
//! keystroke. Each `enqueue` (re)starts a per-entity timer; only the last text
//! seen when the timer fires is embedded. Before calling the model the queue
//! compares content hashes with what the vector store already holds and skips
//! entities whose text has not changed.
//!
//! ```text
//! enqueue ─► pending map (type:id → timer task) ─► sleep(debounce)
//!                                                     │
//!                         sweep gate (read) ◄─────────┘
//!                                │
//!       chunk ─► fingerprint ─► embed ─► VectorStore::replace_entity
//! ```
//!
//! A full reindex holds the sweep gate for writing, so queue jobs wait while
//! the stores are being rebuilt.
//!
//! At most one job per entity runs at a time. Each job carries the generation
//! of the `enqueue` that created it; a job whose entity has since been
//! re-enqueued or removed drops its write instead of storing stale vectors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use margin_context::chunk::{ChunkOptions, chunk};
use margin_context::extract::{content_hash, prepare_for_embedding, preview, should_chunk};
use margin_context::EntityType;
use margin_embed::{EmbedError, Embedder};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::storage::{EmbeddingRecord, VectorStore};

/// Lock shared by queue jobs (readers) and the full-reindex sweep (writer).
pub type SweepGate = Arc<RwLock<()>>;

/// Key under which a pending job is tracked.
pub fn job_key(entity_type: EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type.as_str(), entity_id)
}

/// Text waiting to be embedded for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingJob {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub text: String,
}

/// Counters over the lifetime of a queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entities whose records were written
    pub processed: usize,
    /// Entities left alone because their content hash matched
    pub skipped: usize,
    /// Entities that failed to chunk, embed or store
    pub failed: usize,
}

/// What happened when an entity's text was embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedOutcome {
    /// Records were (re)written; holds the number of chunks
    Stored(usize),
    /// Stored fingerprints already matched the text
    Unchanged,
    /// The text was empty, so any stored records were dropped
    Empty,
    /// A newer job for the entity exists, so nothing was written
    Superseded,
}

/// Chunks, fingerprints and embeds entity text into the vector store.
#[derive(Clone)]
pub struct EntityEmbedder {
    embedder: Arc<dyn Embedder>,
    vector_store: VectorStore,
    chunk_options: ChunkOptions,
}

impl EntityEmbedder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: VectorStore,
        chunk_options: ChunkOptions,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            chunk_options,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `text` for one entity unless its stored fingerprint matches.
    ///
    /// Every chunk is embedded before anything is written, so a failure
    /// leaves the previous records in place.
    pub async fn embed_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        text: &str,
    ) -> Result<EmbedOutcome> {
        self.embed_entity_if_current(entity_id, entity_type, text, &|| true)
            .await
    }

    /// Like [`EntityEmbedder::embed_entity`], but asks `is_current` right
    /// before writing and returns [`EmbedOutcome::Superseded`] when it says no.
    pub async fn embed_entity_if_current(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        text: &str,
        is_current: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<EmbedOutcome> {
        let text = text.trim();
        let chunks = if should_chunk(text) {
            chunk(text, &self.chunk_options)
        } else if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };

        if chunks.is_empty() {
            if !is_current() {
                return Ok(EmbedOutcome::Superseded);
            }
            self.vector_store.delete_by_entity(entity_id).await?;
            return Ok(EmbedOutcome::Empty);
        }

        let hashes: Vec<String> = chunks.iter().map(|c| content_hash(c)).collect();
        let unchanged = match hashes.as_slice() {
            [single] => {
                self.vector_store.get_content_hash(entity_id).await?.as_deref()
                    == Some(single.as_str())
            }
            _ => self.vector_store.get_chunk_hashes(entity_id).await? == hashes,
        };
        if unchanged {
            debug!("Content unchanged for {entity_type}:{entity_id}, skipping");
            return Ok(EmbedOutcome::Unchanged);
        }

        let passages: Vec<String> = chunks
            .iter()
            .map(|c| prepare_for_embedding(c, false))
            .collect();
        let result = self.embedder.embed_batch(&passages).await?;
        if result.len() != chunks.len() {
            return Err(SearchError::Embedding {
                source: EmbedError::embedding_gen(format!(
                    "expected {} embeddings, got {}",
                    chunks.len(),
                    result.len()
                )),
            });
        }

        let created_at = Utc::now();
        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .zip(hashes)
            .zip(result.embeddings)
            .enumerate()
            .map(|(chunk_index, ((text, content_hash), vector))| EmbeddingRecord {
                id: None,
                entity_id: entity_id.to_string(),
                entity_type,
                chunk_index,
                content_hash,
                text_preview: preview(text),
                vector,
                created_at,
            })
            .collect();

        if !is_current() {
            debug!("Dropping stale embedding for {entity_type}:{entity_id}");
            return Ok(EmbedOutcome::Superseded);
        }
        self.vector_store.replace_entity(entity_id, &records).await?;
        debug!(
            "Embedded {entity_type}:{entity_id} as {} chunk(s)",
            records.len()
        );
        Ok(EmbedOutcome::Stored(records.len()))
    }
}

struct PendingJob {
    job: EmbeddingJob,
    generation: u64,
    handle: JoinHandle<()>,
}

struct QueueInner {
    writer: EntityEmbedder,
    sweep_gate: SweepGate,
    debounce: Duration,
    pending: Mutex<HashMap<String, PendingJob>>,
    /// Newest generation enqueued or removed, per entity id
    latest: StdMutex<HashMap<String, u64>>,
    /// Serialises processing per entity id
    entity_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: RwLock<QueueStats>,
    next_generation: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

/// Decrements the running-job counter when a job finishes or is cancelled.
struct ActiveGuard<'a>(&'a QueueInner);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl QueueInner {
    fn claim_generation(&self, entity_id: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let newest = latest.entry(entity_id.to_string()).or_insert(generation);
        *newest = (*newest).max(generation);
        generation
    }

    fn is_current(&self, entity_id: &str, generation: u64) -> bool {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.get(entity_id) == Some(&generation)
    }

    fn entity_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(entity_id.to_string()).or_default())
    }

    fn release_entity_lock(&self, entity_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.entity_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(entity_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(entity_id);
        }
    }

    async fn process(&self, job: &EmbeddingJob, generation: u64) {
        let lock = self.entity_lock(&job.entity_id);
        let outcome = {
            let _entity = lock.lock().await;
            let _gate = self.sweep_gate.read().await;

            if self.is_current(&job.entity_id, generation) {
                let is_current = || self.is_current(&job.entity_id, generation);
                Some(
                    self.writer
                        .embed_entity_if_current(
                            &job.entity_id,
                            job.entity_type,
                            &job.text,
                            &is_current,
                        )
                        .await,
                )
            } else {
                None
            }
        };
        self.release_entity_lock(&job.entity_id, lock);

        let Some(outcome) = outcome else {
            debug!(
                "Skipping superseded job for {}:{}",
                job.entity_type, job.entity_id
            );
            return;
        };

        let mut stats = self.stats.write().await;
        match outcome {
            Ok(EmbedOutcome::Stored(_)) => stats.processed += 1,
            Ok(EmbedOutcome::Unchanged) | Ok(EmbedOutcome::Empty) => stats.skipped += 1,
            Ok(EmbedOutcome::Superseded) => {}
            Err(e) => {
                warn!(
                    "Failed to embed {}:{}: {e}",
                    job.entity_type, job.entity_id
                );
                stats.failed += 1;
            }
        }
    }

    /// Runs a job whose timer fired, unless it was replaced or cancelled.
    async fn fire(self: Arc<Self>, key: String, generation: u64) {
        let job = {
            let mut pending = self.pending.lock().await;
            match pending.get(&key) {
                Some(entry) if entry.generation == generation => {
                    self.active.fetch_add(1, Ordering::SeqCst);
                    pending.remove(&key).map(|entry| entry.job)
                }
                _ => None,
            }
        };

        if let Some(job) = job {
            let _active = ActiveGuard(self.as_ref());
            self.process(&job, generation).await;
        }
    }
}

/// Debounced queue of entities waiting to be embedded.
pub struct EmbeddingQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for EmbeddingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingQueue")
            .field("debounce", &self.inner.debounce)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl EmbeddingQueue {
    pub fn new(writer: EntityEmbedder, sweep_gate: SweepGate, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                writer,
                sweep_gate,
                debounce,
                pending: Mutex::new(HashMap::new()),
                latest: StdMutex::new(HashMap::new()),
                entity_locks: StdMutex::new(HashMap::new()),
                stats: RwLock::new(QueueStats::default()),
                next_generation: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule `text` to be embedded after the debounce delay, replacing any
    /// job already pending for the same entity.
    pub async fn enqueue(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        text: impl Into<String>,
    ) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SearchError::not_initialized(
                "embedding queue has been shut down",
            ));
        }

        let key = job_key(entity_type, entity_id);
        let job = EmbeddingJob {
            entity_id: entity_id.to_string(),
            entity_type,
            text: text.into(),
        };

        let mut pending = self.inner.pending.lock().await;
        let generation = self.inner.claim_generation(entity_id);
        if let Some(previous) = pending.remove(&key) {
            previous.handle.abort();
            debug!("Debounce restarted for {key}");
        }

        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let debounce = self.inner.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(timer_key, generation).await;
        });

        pending.insert(
            key,
            PendingJob {
                job,
                generation,
                handle,
            },
        );
        Ok(())
    }

    /// Cancel pending jobs for `entity_id` and delete its vector records.
    ///
    /// A job already running for the entity finishes first and discards its
    /// write, so no vectors reappear after this returns.
    pub async fn remove_entity(&self, entity_id: &str) -> Result<usize> {
        {
            let mut pending = self.inner.pending.lock().await;
            self.inner.claim_generation(entity_id);
            pending.retain(|key, entry| {
                if entry.job.entity_id == entity_id {
                    entry.handle.abort();
                    debug!("Cancelled pending job {key}");
                    false
                } else {
                    true
                }
            });
        }

        let lock = self.inner.entity_lock(entity_id);
        let deleted = {
            let _entity = lock.lock().await;
            let _gate = self.inner.sweep_gate.read().await;
            self.inner.writer.vector_store.delete_by_entity(entity_id).await
        };
        self.inner.release_entity_lock(entity_id, lock);
        deleted
    }

    /// Run every pending job now and wait for all running jobs to finish.
    pub async fn flush(&self) {
        let mut jobs: Vec<(u64, EmbeddingJob)> = {
            let mut pending = self.inner.pending.lock().await;
            pending
                .drain()
                .map(|(_, entry)| {
                    entry.handle.abort();
                    (entry.generation, entry.job)
                })
                .collect()
        };
        jobs.sort_by_key(|(generation, _)| *generation);

        if !jobs.is_empty() {
            info!("Flushing {} pending embedding job(s)", jobs.len());
        }
        for (generation, job) in &jobs {
            self.inner.process(job, *generation).await;
        }

        self.wait_idle().await;
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Cancel every pending timer without running it. Later enqueues fail.
    pub async fn destroy(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut pending = self.inner.pending.lock().await;
        let cancelled = pending.len();
        for (_, entry) in pending.drain() {
            entry.handle.abort();
        }
        if cancelled > 0 {
            info!("Embedding queue destroyed, {cancelled} pending job(s) dropped");
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub async fn stats(&self) -> QueueStats {
        *self.inner.stats.read().await
    }
}

impl Drop for EmbeddingQueue {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.inner.pending.try_lock() {
            for (_, entry) in pending.drain() {
                entry.handle.abort();
            }
        }
    }
}
