//! Hybrid keyword + semantic search.
//!
//! The keyword path asks the FTS5 index; the semantic path embeds the query
//! and scans the vector store. Both run concurrently. The semantic list is
//! collapsed to one hit per entity and never repeats an entity the keyword
//! list already returned. Scores stay on their own scales, so the two lists
//! are returned side by side rather than interleaved.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use margin_context::EntityType;
use margin_context::extract::prepare_for_embedding;
use margin_embed::Embedder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{KeywordIndex, MatchType, SearchResult, SimilarChunk, VectorStore};

pub const DEFAULT_LIMIT: usize = 5;

/// Per-query options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum results per list
    pub limit: usize,
    /// Restrict both paths to these types; empty means all types
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            entity_types: Vec::new(),
        }
    }
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_entity_types(mut self, entity_types: Vec<EntityType>) -> Self {
        self.entity_types = entity_types;
        self
    }
}

/// Keyword and semantic hits for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HybridResult {
    pub keyword: Vec<SearchResult>,
    pub semantic: Vec<SearchResult>,
}

impl HybridResult {
    pub fn is_empty(&self) -> bool {
        self.keyword.is_empty() && self.semantic.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keyword.len() + self.semantic.len()
    }
}

#[derive(Clone)]
pub struct HybridSearch {
    keyword_index: KeywordIndex,
    vector_store: VectorStore,
    embedder: Arc<dyn Embedder>,
}

impl HybridSearch {
    pub fn new(
        keyword_index: KeywordIndex,
        vector_store: VectorStore,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            keyword_index,
            vector_store,
            embedder,
        }
    }

    /// Run both retrieval paths for `query`.
    ///
    /// A failure on one path is logged and leaves that list empty; the other
    /// list is still returned.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> HybridResult {
        let query = query.trim();
        if query.is_empty() || options.limit == 0 {
            return HybridResult::default();
        }

        let (keyword, semantic) = tokio::join!(
            self.keyword_index
                .search_filtered(query, options.limit, &options.entity_types),
            self.semantic_candidates(query, &options.entity_types),
        );

        let keyword = keyword.unwrap_or_else(|e| {
            warn!("Keyword search failed for {query:?}: {e}");
            Vec::new()
        });
        let semantic = match semantic {
            Ok(candidates) => self.merge_semantic(&keyword, candidates, options.limit).await,
            Err(e) => {
                warn!("Semantic search failed for {query:?}: {e}");
                Vec::new()
            }
        };

        debug!(
            "Query {query:?}: {} keyword, {} semantic",
            keyword.len(),
            semantic.len()
        );
        HybridResult { keyword, semantic }
    }

    /// Every stored chunk scored against the query, best first.
    async fn semantic_candidates(
        &self,
        query: &str,
        entity_types: &[EntityType],
    ) -> Result<Vec<SimilarChunk>> {
        let embedding = self
            .embedder
            .embed(&prepare_for_embedding(query, true))
            .await?;
        self.vector_store
            .search_similar_in(&embedding, usize::MAX, entity_types)
            .await
    }

    async fn merge_semantic(
        &self,
        keyword: &[SearchResult],
        candidates: Vec<SimilarChunk>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let mut seen: HashSet<String> = keyword.iter().map(|r| r.entity_id.clone()).collect();

        // Candidates arrive best first, so the first chunk seen per entity wins
        let best: Vec<SimilarChunk> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.record.entity_id.clone()))
            .take(limit)
            .collect();

        let titles = join_all(best.iter().map(|c| self.title_for(&c.record.entity_id))).await;

        best.into_iter()
            .zip(titles)
            .map(|(candidate, title)| SearchResult {
                title: title.unwrap_or_else(|| candidate.record.text_preview.clone()),
                entity_id: candidate.record.entity_id,
                entity_type: candidate.record.entity_type,
                preview: candidate.record.text_preview,
                score: candidate.score,
                match_type: MatchType::Semantic,
            })
            .collect()
    }

    async fn title_for(&self, entity_id: &str) -> Option<String> {
        match self.keyword_index.get(entity_id).await {
            Ok(document) => document.map(|d| d.title).filter(|t| !t.is_empty()),
            Err(e) => {
                debug!("No keyword document for {entity_id}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedding_queue::EntityEmbedder;
    use crate::storage::Database;
    use async_trait::async_trait;
    use half::f16;
    use margin_context::ChunkOptions;
    use margin_embed::{EmbedError, EmbeddingResult, HashEmbedder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
        broken: bool,
    }

    impl CountingEmbedder {
        async fn new(broken: bool) -> Arc<Self> {
            let inner = HashEmbedder::new(64);
            inner.initialize().await.unwrap();
            Arc::new(Self {
                inner,
                calls: AtomicUsize::new(0),
                broken,
            })
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn initialize(&self) -> margin_embed::Result<()> {
            Ok(())
        }

        fn is_initialized(&self) -> bool {
            true
        }

        async fn embed(&self, text: &str) -> margin_embed::Result<Vec<f16>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err(EmbedError::embedding_gen("model unavailable"));
            }
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> margin_embed::Result<EmbeddingResult> {
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    struct Fixture {
        db: Database,
        keyword: KeywordIndex,
        writer: EntityEmbedder,
        search: HybridSearch,
        embedder: Arc<CountingEmbedder>,
    }

    async fn fixture(broken: bool) -> anyhow::Result<Fixture> {
        let db = Database::open_memory().await?;
        let keyword = KeywordIndex::new(&db).await?;
        let vectors = VectorStore::new(&db).await?;
        let embedder = CountingEmbedder::new(broken).await;
        let writer = EntityEmbedder::new(
            embedder.clone(),
            vectors.clone(),
            ChunkOptions::new(16, 2, 10),
        );
        let search = HybridSearch::new(keyword.clone(), vectors, embedder.clone());
        Ok(Fixture {
            db,
            keyword,
            writer,
            search,
            embedder,
        })
    }

    impl Fixture {
        async fn index(&self, id: &str, entity_type: EntityType, title: &str, body: &str) -> anyhow::Result<()> {
            self.keyword.upsert(id, entity_type, title, body).await?;
            self.writer
                .embed_entity(id, entity_type, &format!("{title}\n\n{body}"))
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_empty_query_touches_nothing() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        // A closed pool makes any database access fail loudly in the logs
        f.db.close().await;

        for query in ["", "   ", "\n\t"] {
            let result = f.search.search(query, &SearchOptions::default()).await;
            assert!(result.is_empty());
        }

        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
        assert!(!logs_contain("search failed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_keyword_hits_are_not_repeated_as_semantic() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        f.index("t1", EntityType::Task, "Buy groceries", "Pick up milk and eggs").await?;
        f.index("n1", EntityType::Note, "Pantry", "groceries budget for the month").await?;
        f.index("p1", EntityType::Project, "Website", "relaunch the marketing site").await?;

        let result = f.search.search("groceries", &SearchOptions::new(10)).await;

        let keyword_ids: Vec<&str> = result.keyword.iter().map(|r| r.entity_id.as_str()).collect();
        assert!(keyword_ids.contains(&"t1"));
        assert!(keyword_ids.contains(&"n1"));
        for hit in &result.semantic {
            assert!(!keyword_ids.contains(&hit.entity_id.as_str()));
            assert_eq!(hit.match_type, MatchType::Semantic);
        }
        assert!(result.keyword.iter().all(|r| r.match_type == MatchType::Keyword));
        Ok(())
    }

    #[tokio::test]
    async fn test_semantic_only_match_and_titles() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        f.index("m1", EntityType::Meeting, "Standup", "quarterly roadmap review").await?;
        // Embedded but not in the keyword index
        f.writer
            .embed_entity("n9", EntityType::Note, "roadmap ideas scratchpad")
            .await?;

        let result = f.search.search("roadmap planning", &SearchOptions::default()).await;

        // "planning" is not in any document, so the AND keyword query misses
        assert!(result.keyword.is_empty());
        let m1 = result.semantic.iter().find(|r| r.entity_id == "m1").unwrap();
        assert_eq!(m1.title, "Standup");
        let n9 = result.semantic.iter().find(|r| r.entity_id == "n9").unwrap();
        assert_eq!(n9.title, "roadmap ideas scratchpad");
        assert_eq!(n9.preview, "roadmap ideas scratchpad");
        Ok(())
    }

    #[tokio::test]
    async fn test_semantic_collapses_chunks_per_entity() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        let long_body = "Harvest notes about tomatoes and peppers in the garden. ".repeat(15);
        f.writer
            .embed_entity("n1", EntityType::Note, &long_body)
            .await?;
        f.writer
            .embed_entity("n2", EntityType::Note, "tomatoes")
            .await?;

        let result = f.search.search("tomatoes", &SearchOptions::new(10)).await;

        let ids: Vec<&str> = result.semantic.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "n1").count(), 1);
        assert_eq!(ids[0], "n2");
        for pair in result.semantic.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_limit_bounds_each_list() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        for i in 0..4 {
            f.index(&format!("k{i}"), EntityType::Task, "garden chores", "weeding").await?;
            f.writer
                .embed_entity(&format!("s{i}"), EntityType::Note, "garden plans")
                .await?;
        }

        let result = f.search.search("garden", &SearchOptions::new(2)).await;
        assert_eq!(result.keyword.len(), 2);
        assert_eq!(result.semantic.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_entity_type_filter_applies_to_both_paths() -> anyhow::Result<()> {
        let f = fixture(false).await?;
        f.index("t1", EntityType::Task, "Invoice client", "send the invoice").await?;
        f.index("n1", EntityType::Note, "Invoice template", "invoice layout").await?;

        let options = SearchOptions::new(10).with_entity_types(vec![EntityType::Note]);
        let result = f.search.search("invoice", &options).await;

        assert!(result.keyword.iter().all(|r| r.entity_type == EntityType::Note));
        assert!(result.semantic.iter().all(|r| r.entity_type == EntityType::Note));
        assert_eq!(result.keyword.len(), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_broken_embedder_keeps_keyword_results() -> anyhow::Result<()> {
        let healthy = fixture(false).await?;
        healthy.index("t1", EntityType::Task, "Buy groceries", "Pick up milk").await?;

        let broken = HybridSearch::new(
            healthy.keyword.clone(),
            VectorStore::new(&healthy.db).await?,
            CountingEmbedder::new(true).await,
        );
        let result = broken.search("groceries", &SearchOptions::default()).await;

        assert_eq!(result.keyword.len(), 1);
        assert_eq!(result.keyword[0].entity_id, "t1");
        assert!(result.semantic.is_empty());
        assert!(logs_contain("Semantic search failed"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_broken_keyword_index_keeps_semantic_results() -> anyhow::Result<()> {
        let healthy = fixture(false).await?;
        healthy.index("t1", EntityType::Task, "Buy groceries", "Pick up milk").await?;

        let other = Database::open_memory().await?;
        let unreachable = KeywordIndex::new(&other).await?;
        other.close().await;

        let degraded = HybridSearch::new(
            unreachable,
            VectorStore::new(&healthy.db).await?,
            healthy.embedder.clone(),
        );
        let result = degraded.search("groceries", &SearchOptions::default()).await;

        assert!(result.keyword.is_empty());
        assert_eq!(result.semantic.len(), 1);
        assert_eq!(result.semantic[0].entity_id, "t1");
        // No keyword document to borrow a title from
        assert_eq!(result.semantic[0].title, result.semantic[0].preview);
        assert!(logs_contain("Keyword search failed"));
        Ok(())
    }

    #[test]
    fn test_search_options_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.limit, 5);
        assert!(options.entity_types.is_empty());

        let parsed: SearchOptions = serde_json::from_str(r#"{"limit": 3}"#).unwrap();
        assert_eq!(parsed, SearchOptions::new(3));
    }
}
