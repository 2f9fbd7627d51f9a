//! Answer-quality metrics and the request fingerprint.
//!
//! All scores lie in `[0, 1]`:
//!
//! | Metric | Definition |
//! |--------|------------|
//! | `citation_coverage` | cited factual sentences / factual sentences |
//! | `groundedness` | factual sentences whose citations are all supported by the cited passages / factual sentences |
//! | `answer_relevance` | share of the query's content terms present in the answer |
//! | `context_relevance` | share of the query's content terms present in the context |
//!
//! Scores are term-overlap proxies; swap the [`ClaimVerifier`] for a stronger
//! entailment check without changing the record contract.

use sha2::{Digest, Sha256};

use crate::citations::{citation_coverage, citation_numbers, claim_text, is_factual_sentence};
use crate::models::EvaluationScores;
use crate::pipeline::fact_check::ClaimVerifier;
use crate::text::{split_sentences, term_overlap};

/// Stable hex SHA-256 over the (query, context, answer) triple.
///
/// Each part is length-prefixed so that moving text between fields changes
/// the fingerprint.
pub fn fingerprint(query: &str, context: &[String], answer: &str) -> String {
    let mut hasher = Sha256::new();
    let mut part = |tag: &[u8], s: &str| {
        hasher.update(tag);
        hasher.update((s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    };
    part(b"q", query);
    for c in context {
        part(b"c", c);
    }
    part(b"a", answer);
    format!("{:x}", hasher.finalize())
}

/// Factual sentences whose every citation points at a passage that
/// supports the claim, divided by all factual sentences. `0.0` when the
/// answer has no factual sentence.
pub fn groundedness(
    answer: &str,
    context: &[String],
    verifier: &dyn ClaimVerifier,
    min_claim_words: usize,
) -> f64 {
    let mut claims = 0usize;
    let mut grounded = 0usize;
    for sentence in split_sentences(answer) {
        if !is_factual_sentence(sentence, min_claim_words) {
            continue;
        }
        claims += 1;
        let cited = citation_numbers(sentence);
        if cited.is_empty() {
            continue;
        }
        let claim = claim_text(sentence);
        let supported = cited.iter().all(|&n| {
            n.checked_sub(1)
                .and_then(|i| context.get(i))
                .is_some_and(|passage| verifier.supports(&claim, passage))
        });
        if supported {
            grounded += 1;
        }
    }
    if claims == 0 {
        0.0
    } else {
        grounded as f64 / claims as f64
    }
}

/// Compute every score for one triple. `context[i]` is citation `i + 1`.
pub fn compute_scores(
    query: &str,
    context: &[String],
    answer: &str,
    verifier: &dyn ClaimVerifier,
    min_claim_words: usize,
) -> EvaluationScores {
    EvaluationScores {
        citation_coverage: citation_coverage(answer, min_claim_words),
        groundedness: groundedness(answer, context, verifier, min_claim_words),
        answer_relevance: term_overlap(query, answer),
        context_relevance: term_overlap(query, &context.join("\n")),
    }
}
