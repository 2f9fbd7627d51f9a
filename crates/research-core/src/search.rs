//! Hybrid retrieval: keyword and vector relevance fused into one ranking.
//!
//! The algorithm operates entirely through the [`Store`] trait. The caller
//! embeds the query (or passes `None` when embeddings are disabled) and
//! supplies [`RetrievalParams`].
//!
//! # Fusion
//!
//! 1. Fetch `candidate_k` keyword candidates and `candidate_k` vector candidates.
//! 2. Min-max normalize each set independently to `[0, 1]`.
//! 3. Merge by chunk id; a chunk missing from one set scores `0` there.
//! 4. `fused = alpha × vector + (1 − alpha) × keyword`.
//! 5. Sort by fused score (desc), then insertion order (asc).
//! 6. Truncate to `top_k`.
//!
//! An empty index yields `Ok(vec![])`; an unreachable index yields
//! [`EngineError::Retrieval`]. Callers must keep the two apart.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::models::{DocumentMetadata, RetrievalResult};
use crate::store::{ChunkCandidate, Store};

/// Largest `top_k` accepted at the query boundary.
pub const MAX_TOP_K: usize = 20;

/// Retrieval tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Number of results to return (1–20).
    pub top_k: usize,
    /// Fusion weight: 0 = pure keyword, 1 = pure vector.
    pub alpha: f64,
    /// Candidates fetched from each of the keyword and vector searches.
    pub candidate_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            alpha: 0.5,
            candidate_k: 50,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(EngineError::Validation(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_TOP_K, self.top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(EngineError::Validation(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }

    /// Same parameters with a different `top_k`.
    pub fn with_top_k(&self, top_k: usize) -> Self {
        Self {
            top_k,
            candidate_k: self.candidate_k.max(top_k),
            ..self.clone()
        }
    }
}

/// `alpha × vector + (1 − alpha) × keyword`.
pub fn fuse(alpha: f64, vector_score: f64, keyword_score: f64) -> f64 {
    alpha * vector_score + (1.0 - alpha) * keyword_score
}

/// Min-max normalize raw scores to `[0, 1]`, keyed by chunk id.
///
/// If all scores are equal, every candidate normalizes to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> HashMap<&str, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c.chunk.id.as_str(), norm)
        })
        .collect()
}

/// Run hybrid retrieval for `query` against `store`.
pub async fn hybrid_search<S: Store + ?Sized>(
    store: &S,
    query: &str,
    query_vec: Option<&[f32]>,
    params: &RetrievalParams,
) -> EngineResult<Vec<RetrievalResult>> {
    params.validate()?;

    let indexed = store
        .chunk_count()
        .await
        .map_err(|e| EngineError::Retrieval(format!("{:#}", e)))?;
    if indexed == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let keyword = store
        .keyword_search(query, params.candidate_k)
        .await
        .map_err(|e| EngineError::Retrieval(format!("keyword search: {:#}", e)))?;
    let vector = match query_vec {
        Some(qv) => store
            .vector_search(qv, params.candidate_k)
            .await
            .map_err(|e| EngineError::Retrieval(format!("vector search: {:#}", e)))?,
        None => Vec::new(),
    };

    let mut results = fuse_candidates(&keyword, &vector, params.alpha);
    results.truncate(params.top_k);

    let mut metadata_cache: HashMap<String, Option<DocumentMetadata>> = HashMap::new();
    for r in &mut results {
        let source = r.chunk.source.clone();
        if !metadata_cache.contains_key(&source) {
            let meta = store
                .document_metadata(&source)
                .await
                .map_err(|e| EngineError::Retrieval(format!("document metadata: {:#}", e)))?;
            metadata_cache.insert(source.clone(), meta);
        }
        r.metadata = metadata_cache.get(&source).cloned().flatten();
    }

    tracing::debug!(
        keyword_candidates = keyword.len(),
        vector_candidates = vector.len(),
        returned = results.len(),
        alpha = params.alpha,
        "hybrid search complete"
    );
    Ok(results)
}

/// Normalize, merge and rank two candidate lists. Deterministic for equal
/// inputs: ties are broken by insertion sequence.
pub fn fuse_candidates(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
) -> Vec<RetrievalResult> {
    let kw_norm = normalize_scores(keyword);
    let vec_norm = normalize_scores(vector);

    let mut merged: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        merged.entry(c.chunk.id.as_str()).or_insert(c);
    }

    let mut scored: Vec<(i64, RetrievalResult)> = merged
        .into_iter()
        .map(|(id, cand)| {
            let k = kw_norm.get(id).copied().unwrap_or(0.0);
            let v = vec_norm.get(id).copied().unwrap_or(0.0);
            (
                cand.seq,
                RetrievalResult {
                    chunk: cand.chunk.clone(),
                    keyword_score: k,
                    vector_score: v,
                    fused_score: fuse(alpha, v, k),
                    metadata: None,
                },
            )
        })
        .collect();

    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });

    scored.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::store::memory::InMemoryStore;
    use proptest::prelude::*;

    fn cand(id: &str, seq: i64, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk: Chunk {
                id: id.to_string(),
                source: "s".to_string(),
                position: seq,
                text: String::new(),
            },
            seq,
            raw_score: score,
        }
    }

    fn order(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_normalize_range_and_equal() {
        let cands = vec![cand("a", 0, 10.0), cand("b", 1, 5.0), cand("c", 2, 0.0)];
        let n = normalize_scores(&cands);
        assert!((n["a"] - 1.0).abs() < 1e-9);
        assert!((n["b"] - 0.5).abs() < 1e-9);
        assert!(n["c"].abs() < 1e-9);

        let same = vec![cand("a", 0, 3.0), cand("b", 1, 3.0)];
        assert!(normalize_scores(&same).values().all(|s| (*s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_alpha_zero_is_keyword_order() {
        let kw = vec![cand("a", 0, 10.0), cand("b", 1, 5.0), cand("c", 2, 1.0)];
        let vec = vec![cand("a", 0, 0.1), cand("b", 1, 0.9), cand("c", 2, 0.5)];
        assert_eq!(order(&fuse_candidates(&kw, &vec, 0.0)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_alpha_one_is_vector_order() {
        let kw = vec![cand("a", 0, 10.0), cand("b", 1, 5.0), cand("c", 2, 1.0)];
        let vec = vec![cand("a", 0, 0.1), cand("b", 1, 0.9), cand("c", 2, 0.5)];
        assert_eq!(order(&fuse_candidates(&kw, &vec, 1.0)), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let kw = vec![cand("late", 7, 2.0), cand("early", 3, 2.0), cand("mid", 5, 2.0)];
        let results = fuse_candidates(&kw, &[], 0.5);
        assert_eq!(order(&results), vec!["early", "mid", "late"]);
        assert_eq!(order(&fuse_candidates(&kw, &[], 0.5)), order(&results));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let p = RetrievalParams {
            top_k: 0,
            ..Default::default()
        };
        assert!(matches!(p.validate(), Err(EngineError::Validation(_))));
        let p = RetrievalParams {
            top_k: 21,
            ..Default::default()
        };
        assert!(p.validate().is_err());
        let p = RetrievalParams {
            alpha: 1.5,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }

    #[tokio::test]
    async fn test_empty_index_is_empty_not_error() {
        let store = InMemoryStore::new();
        let results = hybrid_search(&store, "anything", None, &RetrievalParams::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    proptest! {
        #[test]
        fn prop_fused_monotone_in_alpha(
            k in 0.0f64..=1.0,
            v in 0.0f64..=1.0,
            a1 in 0.0f64..=1.0,
            a2 in 0.0f64..=1.0,
        ) {
            let (lo, hi) = if a1 <= a2 { (a1, a2) } else { (a2, a1) };
            let f_lo = fuse(lo, v, k);
            let f_hi = fuse(hi, v, k);
            if v >= k {
                prop_assert!(f_hi >= f_lo - 1e-12);
            } else {
                prop_assert!(f_hi <= f_lo + 1e-12);
            }
        }

        #[test]
        fn prop_normalized_scores_in_unit_interval(scores in proptest::collection::vec(-100.0f64..100.0, 1..20)) {
            let cands: Vec<ChunkCandidate> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| cand(&format!("c{}", i), i as i64, *s))
                .collect();
            for (_, s) in normalize_scores(&cands) {
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
