//! SQLite-backed [`Store`] and [`EvaluationStore`].
//!
//! Documents and chunks are insert-only: `INSERT OR IGNORE` keeps the first
//! copy and reports whether a row was written. Keyword candidates come from
//! FTS5 (BM25, negated so higher is better); vector candidates are scored by
//! brute-force cosine similarity over `chunk_vectors`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use research_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use research_core::models::{
    Chunk, Document, DocumentMetadata, EvaluationRecord, EvaluationScores,
};
use research_core::store::{ChunkCandidate, Store};
use research_core::text::term_set;

use crate::evaluation::EvaluationStore;

pub struct SqliteStore {
    pool: SqlitePool,
    /// Embedding model name recorded next to each vector.
    model: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            model: "none".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// FTS5 query matching any content term of `query`. Terms are quoted so
/// punctuation in user input never reaches the FTS5 parser.
fn fts_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = term_set(query).into_iter().collect();
    if terms.is_empty() {
        return None;
    }
    terms.sort();
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn row_chunk(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        source: row.get("source"),
        position: row.get("position"),
        text: row.get("text"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<bool> {
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO documents (source, body, metadata_json, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&doc.source)
        .bind(&doc.text)
        .bind(&metadata_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn contains_chunk(&self, chunk_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_chunk(&self, chunk: &Chunk, vector: Option<&[f32]>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO chunks (id, source, position, text) VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.position)
        .bind(&chunk.text)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        if let Some(vec) = vector {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, model, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&self.model)
            .bind(vec.len() as i64)
            .bind(vec_to_blob(vec))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn document_metadata(&self, source: &str) -> Result<Option<DocumentMetadata>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM documents WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j).with_context(|| {
                format!("corrupt metadata for document {}", source)
            })?)),
            None => Ok(None),
        }
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT chunks.id, chunks.source, chunks.position, chunks.text, chunks.seq,
                   chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks ON chunks.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY chunks_fts.rank, chunks.seq
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkCandidate {
                    chunk: row_chunk(row),
                    seq: row.get("seq"),
                    raw_score: -rank,
                }
            })
            .collect())
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT chunks.id, chunks.source, chunks.position, chunks.text, chunks.seq,
                   chunk_vectors.embedding
            FROM chunk_vectors
            JOIN chunks ON chunks.id = chunk_vectors.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkCandidate {
                    chunk: row_chunk(row),
                    seq: row.get("seq"),
                    raw_score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn row_record(row: &SqliteRow) -> Result<EvaluationRecord> {
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .with_context(|| format!("invalid evaluation timestamp: {}", created_at))?
        .with_timezone(&Utc);
    Ok(EvaluationRecord {
        record_id: row.get("record_id"),
        fingerprint: row.get("fingerprint"),
        scores: EvaluationScores {
            citation_coverage: row.get("citation_coverage"),
            groundedness: row.get("groundedness"),
            answer_relevance: row.get("answer_relevance"),
            context_relevance: row.get("context_relevance"),
        },
        created_at,
    })
}

const RECORD_COLUMNS: &str = "record_id, fingerprint, citation_coverage, groundedness, \
                              answer_relevance, context_relevance, created_at";

#[async_trait]
impl EvaluationStore for SqliteStore {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EvaluationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evaluations WHERE fingerprint = ?",
            RECORD_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_record).transpose()
    }

    async fn find_by_id(&self, record_id: &str) -> Result<Option<EvaluationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evaluations WHERE record_id = ?",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_record).transpose()
    }

    async fn put(&self, record: &EvaluationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO evaluations (record_id, fingerprint, citation_coverage, groundedness,
                                     answer_relevance, context_relevance, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                record_id = excluded.record_id,
                citation_coverage = excluded.citation_coverage,
                groundedness = excluded.groundedness,
                answer_relevance = excluded.answer_relevance,
                context_relevance = excluded.context_relevance,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.fingerprint)
        .bind(record.scores.citation_coverage)
        .bind(record.scores.groundedness)
        .bind(record.scores.answer_relevance)
        .bind(record.scores.context_relevance)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evaluations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
