//! Full-text keyword index backed by SQLite FTS5.
//!
//! Documents are tokenized with `porter unicode61`, so "running" matches
//! "run" and accented text folds sensibly. Results are ranked with BM25,
//! with the title weighted above the body.

use super::{Database, KeywordDocument, MatchType, SearchResult, parse_entity_type};
use crate::error::{Result, SearchError};
use margin_context::EntityType;
use margin_context::extract::preview;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

/// Turns free user input into a safe FTS5 expression.
///
/// Anything other than letters, digits, `_` and whitespace becomes a space.
/// Each remaining term is double-quoted so FTS5 operators typed by the user
/// are treated as plain words; the terms are implicitly ANDed. Returns `None`
/// when nothing searchable is left.
pub fn sanitize_query(query: &str) -> Option<String> {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|term| format!("\"{term}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[derive(Clone, Debug)]
pub struct KeywordIndex {
    pool: SqlitePool,
}

impl KeywordIndex {
    pub async fn new(database: &Database) -> Result<Self> {
        let pool = database.pool().clone();
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
                entity_id UNINDEXED,
                entity_type UNINDEXED,
                title,
                body,
                tokenize = 'porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Replaces the document for `entity_id`. Delete and insert share one
    /// transaction, so readers never see zero or two documents.
    pub async fn upsert(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        title: &str,
        body: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM search_index WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO search_index (entity_id, entity_type, title, body) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(entity_id)
        .bind(entity_type.as_str())
        .bind(title)
        .bind(body)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Keyword document stored for {entity_type}:{entity_id}");
        Ok(())
    }

    /// Removes the document for `entity_id`. Returns whether one existed.
    pub async fn remove(&self, entity_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM search_index WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, entity_id: &str) -> Result<Option<KeywordDocument>> {
        let row = sqlx::query(
            "SELECT entity_id, entity_type, title, body FROM search_index WHERE entity_id = ?1 LIMIT 1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let entity_type: String = row.get("entity_type");
            Ok(KeywordDocument {
                entity_id: row.get("entity_id"),
                entity_type: parse_entity_type(&entity_type)?,
                title: row.get("title"),
                body: row.get("body"),
            })
        })
        .transpose()
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.search_filtered(query, limit, &[]).await
    }

    /// Keyword search restricted to `entity_types` (all types when empty).
    ///
    /// Queries the full-text engine cannot parse are logged and yield no
    /// results; any other database failure is returned.
    pub async fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        entity_types: &[EntityType],
    ) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(match_expr) = sanitize_query(query) else {
            return Ok(Vec::new());
        };

        match self.run_match(&match_expr, limit, entity_types).await {
            Err(SearchError::QuerySyntax { message }) => {
                warn!("Keyword query {query:?} rejected: {message}");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn run_match(
        &self,
        match_expr: &str,
        limit: usize,
        entity_types: &[EntityType],
    ) -> Result<Vec<SearchResult>> {
        let type_filter = if entity_types.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = (0..entity_types.len())
                .map(|i| format!("?{}", i + 3))
                .collect();
            format!("AND entity_type IN ({})", placeholders.join(", "))
        };

        let sql = format!(
            r#"
            SELECT entity_id, entity_type, title,
                   snippet(search_index, 3, '', '', '...', 40) AS snippet,
                   bm25(search_index, 0.0, 0.0, 2.0, 1.0) AS bm25_rank
            FROM search_index
            WHERE search_index MATCH ?1 {type_filter}
            ORDER BY bm25_rank
            LIMIT ?2
            "#
        );

        let mut statement = sqlx::query(&sql)
            .bind(match_expr)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX));
        for entity_type in entity_types {
            statement = statement.bind(entity_type.as_str());
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(|e| {
            if SearchError::is_fts_syntax_error(&e) {
                SearchError::QuerySyntax {
                    message: e.to_string(),
                }
            } else {
                SearchError::from(e)
            }
        })?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_type: String = row.get("entity_type");
            let title: String = row.get("title");
            let snippet: Option<String> = row.get("snippet");
            let rank: f64 = row.get("bm25_rank");

            let preview = match snippet.map(|s| preview(&s)) {
                Some(s) if !s.is_empty() => s,
                _ => preview(&title),
            };

            results.push(SearchResult {
                entity_id: row.get("entity_id"),
                entity_type: parse_entity_type(&entity_type)?,
                title,
                preview,
                score: (-rank).max(0.0) as f32,
                match_type: MatchType::Keyword,
            });
        }
        Ok(results)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM search_index")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of documents in the index.
    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_index")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn index() -> anyhow::Result<KeywordIndex> {
        let db = Database::open_memory().await?;
        Ok(KeywordIndex::new(&db).await?)
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("groceries"), Some("\"groceries\"".to_string()));
        assert_eq!(
            sanitize_query("budget: \"Q3\" OR (hiring)*"),
            Some("\"budget\" \"Q3\" \"OR\" \"hiring\"".to_string())
        );
        assert_eq!(sanitize_query("user_id"), Some("\"user_id\"".to_string()));
        assert_eq!(sanitize_query("   "), None);
        assert_eq!(sanitize_query("!!! ---"), None);
    }

    #[tokio::test]
    async fn test_upsert_and_search() -> anyhow::Result<()> {
        let index = index().await?;
        index
            .upsert("t1", EntityType::Task, "Buy groceries", "Pick up milk and eggs")
            .await?;
        index
            .upsert("n1", EntityType::Note, "Trip ideas", "Visit the mountains")
            .await?;

        let results = index.search("groceries", 10).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "t1");
        assert_eq!(results[0].entity_type, EntityType::Task);
        assert_eq!(results[0].title, "Buy groceries");
        assert_eq!(results[0].match_type, MatchType::Keyword);
        assert!(results[0].score > 0.0);

        // Body matches work too and produce a snippet preview
        let results = index.search("milk", 10).await?;
        assert_eq!(results[0].entity_id, "t1");
        assert!(results[0].preview.contains("milk"));
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_document() -> anyhow::Result<()> {
        let index = index().await?;
        index.upsert("t1", EntityType::Task, "Old title", "alpha").await?;
        index.upsert("t1", EntityType::Task, "New title", "beta").await?;

        assert_eq!(index.count().await?, 1);
        assert!(index.search("alpha", 10).await?.is_empty());
        assert_eq!(index.search("beta", 10).await?.len(), 1);
        assert_eq!(index.get("t1").await?.unwrap().title, "New title");
        Ok(())
    }

    #[tokio::test]
    async fn test_remove() -> anyhow::Result<()> {
        let index = index().await?;
        index
            .upsert("t1", EntityType::Task, "Buy groceries", "Pick up milk and eggs")
            .await?;

        assert!(index.remove("t1").await?);
        assert!(!index.remove("t1").await?);
        assert!(index.search("groceries", 10).await?.is_empty());
        assert!(index.get("t1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_porter_stemming() -> anyhow::Result<()> {
        let index = index().await?;
        index
            .upsert("n1", EntityType::Note, "Training log", "I run every morning")
            .await?;

        let results = index.search("running", 10).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "n1");
        Ok(())
    }

    #[tokio::test]
    async fn test_terms_are_anded() -> anyhow::Result<()> {
        let index = index().await?;
        index.upsert("a", EntityType::Note, "Budget", "quarterly budget review").await?;
        index.upsert("b", EntityType::Note, "Review", "code review checklist").await?;

        let results = index.search("budget review", 10).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn test_title_matches_rank_first() -> anyhow::Result<()> {
        let index = index().await?;
        index
            .upsert("body", EntityType::Note, "Weekly notes", "talked about the launch plan in detail")
            .await?;
        index.upsert("title", EntityType::Project, "Launch", "").await?;

        let results = index.search("launch", 10).await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity_id, "title");
        // Empty body falls back to the title for the preview
        assert_eq!(results[0].preview, "Launch");
        Ok(())
    }

    #[tokio::test]
    async fn test_type_filter_and_limit() -> anyhow::Result<()> {
        let index = index().await?;
        for i in 0..5 {
            index
                .upsert(&format!("t{i}"), EntityType::Task, "Report", "write the report")
                .await?;
            index
                .upsert(&format!("n{i}"), EntityType::Note, "Report", "report notes")
                .await?;
        }

        assert_eq!(index.search("report", 3).await?.len(), 3);

        let notes = index
            .search_filtered("report", 10, &[EntityType::Note])
            .await?;
        assert_eq!(notes.len(), 5);
        assert!(notes.iter().all(|r| r.entity_type == EntityType::Note));

        let both = index
            .search_filtered("report", 20, &[EntityType::Note, EntityType::Task])
            .await?;
        assert_eq!(both.len(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_hostile_input_does_not_error() -> anyhow::Result<()> {
        let index = index().await?;
        index.upsert("t1", EntityType::Task, "Fix \"quotes\"", "NEAR AND OR").await?;

        for query in ["\"", "NEAR(", "a OR", "*", "title:fix", "^-+", "", "   "] {
            index.search(query, 10).await?;
        }
        assert_eq!(index.search("\"quotes", 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear() -> anyhow::Result<()> {
        let index = index().await?;
        index.upsert("t1", EntityType::Task, "One", "").await?;
        index.upsert("t2", EntityType::Task, "Two", "").await?;
        assert_eq!(index.count().await?, 2);

        index.clear().await?;
        assert_eq!(index.count().await?, 0);
        Ok(())
    }
}
