//! Retrieval backend abstraction.
//!
//! The [`Store`] trait is the contract the engine consumes from the
//! vector/keyword index: idempotent document and chunk insertion, keyword
//! and vector candidate search, and a chunk count so callers can tell an
//! empty index apart from an unreachable one.
//!
//! Implementations must be `Send + Sync` to be shared between concurrent
//! pipeline runs.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentMetadata};

/// A chunk returned from keyword or vector search with its raw backend
/// score (BM25 relevance, term-match weight, or cosine similarity).
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk: Chunk,
    /// Insertion sequence number; lower means ingested earlier.
    pub seq: i64,
    pub raw_score: f64,
}

/// Abstract index backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Store a document once; never overwrite |
/// | [`contains_chunk`](Store::contains_chunk) | Deduplication check before embedding |
/// | [`insert_chunk`](Store::insert_chunk) | Store a chunk (and vector) once; never overwrite |
/// | [`chunk_count`](Store::chunk_count) | Distinguish an empty index |
/// | [`document_metadata`](Store::document_metadata) | Authors/date for source attribution |
/// | [`keyword_search`](Store::keyword_search) | Keyword candidates |
/// | [`vector_search`](Store::vector_search) | Vector-similarity candidates |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a document. Returns `false` when the source already exists
    /// (the stored document is left untouched).
    async fn insert_document(&self, doc: &Document) -> Result<bool>;

    async fn contains_chunk(&self, chunk_id: &str) -> Result<bool>;

    /// Insert a chunk with an optional embedding. Returns `false` and
    /// changes nothing when a chunk with the same id already exists.
    async fn insert_chunk(&self, chunk: &Chunk, vector: Option<&[f32]>) -> Result<bool>;

    async fn chunk_count(&self) -> Result<u64>;

    async fn document_metadata(&self, source: &str) -> Result<Option<DocumentMetadata>>;

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>>;

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>>;
}
