//! Embedding storage with brute-force cosine similarity search.
//!
//! Vectors are stored as packed f16 blobs, one row per entity chunk. Search
//! is a linear scan over the (optionally type-filtered) rows, which is fine
//! for the size of a personal knowledge base.

use super::{Database, EmbeddingRecord, parse_entity_type};
use crate::error::Result;
use chrono::{DateTime, Utc};
use half::f16;
use margin_context::EntityType;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// A stored chunk together with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarChunk {
    pub record: EmbeddingRecord,
    pub score: f32,
}

/// Cosine similarity of two vectors.
///
/// Returns 0 for vectors of different lengths, empty vectors and zero
/// vectors, so a model change never produces an error or a NaN score.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn encode_vector(vector: &[f16]) -> &[u8] {
    bytemuck::cast_slice::<f16, u8>(vector)
}

fn decode_vector(bytes: &[u8]) -> Vec<f16> {
    // Blobs read back from SQLite carry no alignment guarantee
    bytes
        .chunks_exact(std::mem::size_of::<f16>())
        .map(bytemuck::pod_read_unaligned::<f16>)
        .collect()
}

const RECORD_COLUMNS: &str =
    "id, entity_id, entity_type, chunk_index, content_hash, text_preview, vector, created_at";

fn record_from_row(row: &SqliteRow) -> Result<EmbeddingRecord> {
    let entity_type: String = row.get("entity_type");
    let chunk_index: i64 = row.get("chunk_index");
    let vector: Vec<u8> = row.get("vector");

    Ok(EmbeddingRecord {
        id: Some(row.get("id")),
        entity_id: row.get("entity_id"),
        entity_type: parse_entity_type(&entity_type)?,
        chunk_index: chunk_index as usize,
        content_hash: row.get("content_hash"),
        text_preview: row.get("text_preview"),
        vector: decode_vector(&vector),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

#[derive(Clone, Debug)]
pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub async fn new(database: &Database) -> Result<Self> {
        let pool = database.pool().clone();
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                text_preview TEXT NOT NULL,
                vector BLOB NOT NULL,
                created_at TIMESTAMP NOT NULL,
                CONSTRAINT unique_entity_chunk UNIQUE(entity_id, chunk_index)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_type ON embeddings(entity_type)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Inserts a record, replacing any existing row for the same
    /// (entity_id, chunk_index). Returns the row id.
    pub async fn upsert(&self, record: &EmbeddingRecord) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_with(&mut conn, record).await
    }

    async fn upsert_with(conn: &mut SqliteConnection, record: &EmbeddingRecord) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO embeddings
                (entity_id, entity_type, chunk_index, content_hash, text_preview, vector, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(entity_id, chunk_index) DO UPDATE SET
                entity_type = excluded.entity_type,
                content_hash = excluded.content_hash,
                text_preview = excluded.text_preview,
                vector = excluded.vector,
                created_at = excluded.created_at
            RETURNING id
            "#,
        )
        .bind(&record.entity_id)
        .bind(record.entity_type.as_str())
        .bind(record.chunk_index as i64)
        .bind(&record.content_hash)
        .bind(&record.text_preview)
        .bind(encode_vector(&record.vector))
        .bind(record.created_at)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    /// Atomically replaces every record of `entity_id` with `records`.
    pub async fn replace_entity(
        &self,
        entity_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embeddings WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(Self::upsert_with(&mut *tx, record).await?);
        }

        tx.commit().await?;
        debug!("Stored {} embedding records for {entity_id}", ids.len());
        Ok(ids)
    }

    /// Deletes every record of `entity_id`, returning how many were removed.
    pub async fn delete_by_entity(&self, entity_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM embeddings WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// All records of `entity_id`, ordered by chunk index.
    pub async fn get_by_entity(&self, entity_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM embeddings WHERE entity_id = ?1 ORDER BY chunk_index"
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Content hash of chunk 0 of `entity_id`, if stored.
    pub async fn get_content_hash(&self, entity_id: &str) -> Result<Option<String>> {
        let hash = sqlx::query_scalar(
            "SELECT content_hash FROM embeddings WHERE entity_id = ?1 AND chunk_index = 0",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    /// Content hashes of every stored chunk of `entity_id`, in chunk order.
    pub async fn get_chunk_hashes(&self, entity_id: &str) -> Result<Vec<String>> {
        let hashes = sqlx::query_scalar(
            "SELECT content_hash FROM embeddings WHERE entity_id = ?1 ORDER BY chunk_index",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes)
    }

    pub async fn search_similar(
        &self,
        query: &[f16],
        limit: usize,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<SimilarChunk>> {
        match entity_type {
            Some(entity_type) => self.search_similar_in(query, limit, &[entity_type]).await,
            None => self.search_similar_in(query, limit, &[]).await,
        }
    }

    /// Top `limit` chunks by cosine similarity, restricted to `entity_types`
    /// when it is non-empty.
    pub async fn search_similar_in(
        &self,
        query: &[f16],
        limit: usize,
        entity_types: &[EntityType],
    ) -> Result<Vec<SimilarChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = if entity_types.is_empty() {
            format!("SELECT {RECORD_COLUMNS} FROM embeddings")
        } else {
            let placeholders: Vec<String> = (1..=entity_types.len())
                .map(|i| format!("?{i}"))
                .collect();
            format!(
                "SELECT {RECORD_COLUMNS} FROM embeddings WHERE entity_type IN ({})",
                placeholders.join(", ")
            )
        };

        let mut statement = sqlx::query(&sql);
        for entity_type in entity_types {
            statement = statement.bind(entity_type.as_str());
        }
        let rows = statement.fetch_all(&self.pool).await?;

        let mut similarities = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = record_from_row(row)?;
            let score = cosine_similarity(query, &record.vector);
            similarities.push(SimilarChunk { record, score });
        }

        // Sort by similarity score (descending)
        similarities.sort_by(|a, b| b.score.total_cmp(&a.score));
        similarities.truncate(limit);

        Ok(similarities)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM embeddings")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of distinct entities with at least one stored chunk.
    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT entity_id) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
