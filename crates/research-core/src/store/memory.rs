//! In-memory [`Store`] for tests and embedded use.
//!
//! Chunks live in a `Vec` in insertion order behind a `std::sync::RwLock`.
//! Keyword search scores chunks by log-scaled term frequency of the query's
//! content terms; vector search is brute-force cosine similarity. No lock
//! is held across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, DocumentMetadata};
use crate::text::{content_terms, term_set};

use super::{ChunkCandidate, Store};

struct StoredChunk {
    chunk: Chunk,
    seq: i64,
    vector: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    chunks: Vec<StoredChunk>,
    by_id: HashMap<String, usize>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of all stored chunks, in insertion order.
    pub fn chunk_ids(&self) -> Vec<String> {
        match self.inner.read() {
            Ok(inner) => inner.chunks.iter().map(|c| c.chunk.id.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn sort_desc(candidates: &mut [ChunkCandidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.documents.contains_key(&doc.source) {
            return Ok(false);
        }
        inner.documents.insert(doc.source.clone(), doc.clone());
        Ok(true)
    }

    async fn contains_chunk(&self, chunk_id: &str) -> Result<bool> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.by_id.contains_key(chunk_id))
    }

    async fn insert_chunk(&self, chunk: &Chunk, vector: Option<&[f32]>) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.by_id.contains_key(&chunk.id) {
            return Ok(false);
        }
        let idx = inner.chunks.len();
        let seq = idx as i64;
        inner.by_id.insert(chunk.id.clone(), idx);
        inner.chunks.push(StoredChunk {
            chunk: chunk.clone(),
            seq,
            vector: vector.map(|v| v.to_vec()),
        });
        Ok(true)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.chunks.len() as u64)
    }

    async fn document_metadata(&self, source: &str) -> Result<Option<DocumentMetadata>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.documents.get(source).map(|d| d.metadata.clone()))
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>> {
        let terms = term_set(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().map_err(poisoned)?;
        let mut candidates: Vec<ChunkCandidate> = inner
            .chunks
            .iter()
            .filter_map(|sc| {
                let mut tf: HashMap<String, usize> = HashMap::new();
                for t in content_terms(&sc.chunk.text) {
                    if terms.contains(&t) {
                        *tf.entry(t).or_default() += 1;
                    }
                }
                if tf.is_empty() {
                    return None;
                }
                let score: f64 = tf.values().map(|&n| 1.0 + (n as f64).ln()).sum();
                Some(ChunkCandidate {
                    chunk: sc.chunk.clone(),
                    seq: sc.seq,
                    raw_score: score,
                })
            })
            .collect();
        sort_desc(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut candidates: Vec<ChunkCandidate> = inner
            .chunks
            .iter()
            .filter_map(|sc| {
                let v = sc.vector.as_ref()?;
                Some(ChunkCandidate {
                    chunk: sc.chunk.clone(),
                    seq: sc.seq,
                    raw_score: cosine_similarity(query_vec, v) as f64,
                })
            })
            .collect();
        sort_desc(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}
