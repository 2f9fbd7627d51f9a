//! Deterministic citation verification.
//!
//! Every sentence carrying `[i]` markers is checked against the passage of
//! each cited entry through a [`ClaimVerifier`]. Unsupported citations are
//! stripped (and flagged) or the whole sentence is dropped, depending on
//! [`FactCheckStrictness`]. The surviving markers are then renumbered to a
//! gapless `1..=m` sequence.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::citations::{citation_numbers, claim_text, renumber, retain_citations};
use crate::context::ContextBlock;
use crate::error::{EngineError, EngineResult};
use crate::text::{normalize_whitespace, split_sentences, term_overlap};

/// Decides whether a passage supports a claim.
pub trait ClaimVerifier: Send + Sync {
    fn supports(&self, claim: &str, chunk_text: &str) -> bool;
}

/// Substring match, else the fraction of the claim's content terms found in
/// the passage must reach `min_overlap`.
#[derive(Debug, Clone, Copy)]
pub struct TermOverlapVerifier {
    pub min_overlap: f64,
}

impl TermOverlapVerifier {
    pub fn new(min_overlap: f64) -> Self {
        Self { min_overlap }
    }
}

impl Default for TermOverlapVerifier {
    fn default() -> Self {
        Self { min_overlap: 0.5 }
    }
}

impl ClaimVerifier for TermOverlapVerifier {
    fn supports(&self, claim: &str, chunk_text: &str) -> bool {
        let claim_norm = normalize_whitespace(claim.trim_end_matches(['.', '!', '?']))
            .to_lowercase();
        if claim_norm.is_empty() {
            return false;
        }
        if normalize_whitespace(chunk_text)
            .to_lowercase()
            .contains(&claim_norm)
        {
            return true;
        }
        term_overlap(claim, chunk_text) >= self.min_overlap
    }
}

/// What to do with a claim whose citation is not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCheckStrictness {
    /// Remove the unsupported marker, keep the sentence.
    #[default]
    StripCitation,
    /// Remove the whole sentence.
    RemoveClaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    /// The cited passage does not support the claim.
    Unsupported,
    /// The number does not exist in the context block.
    OutOfRange,
    /// Reviewer introduced a number the writer never used.
    NotInDraft,
    /// Markers are not allowed in fallback mode.
    FallbackMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagAction {
    CitationStripped,
    ClaimRemoved,
}

/// Audit entry for one citation the pipeline corrected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationFlag {
    /// Citation number as it appeared before correction.
    pub citation: usize,
    pub claim: String,
    pub reason: FlagReason,
    pub action: FlagAction,
}

/// Result of fact checking one reviewed answer.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCheckOutcome {
    pub text: String,
    /// `citation_map[k - 1]` is the context entry that citation `k` refers to.
    pub citation_map: Vec<usize>,
    pub flags: Vec<CitationFlag>,
}

impl FactCheckOutcome {
    pub fn citations_used(&self) -> BTreeSet<usize> {
        (1..=self.citation_map.len()).collect()
    }
}

/// Verify every cited sentence of `reviewed` against `block`.
///
/// Fails with [`EngineError::CitationViolation`] when nothing remains after
/// correction.
pub fn fact_check(
    reviewed: &str,
    block: &ContextBlock,
    verifier: &dyn ClaimVerifier,
    strictness: FactCheckStrictness,
) -> EngineResult<FactCheckOutcome> {
    let mut kept = String::with_capacity(reviewed.len());
    let mut flags = Vec::new();

    for sentence in split_sentences(reviewed) {
        let mut cited: Vec<usize> = citation_numbers(sentence);
        if cited.is_empty() {
            kept.push_str(sentence);
            continue;
        }
        cited.sort_unstable();
        cited.dedup();

        let claim = claim_text(sentence);
        let rejected: Vec<(usize, FlagReason)> = cited
            .iter()
            .filter_map(|&n| match block.get(n) {
                None => Some((n, FlagReason::OutOfRange)),
                Some(entry) if !verifier.supports(&claim, &entry.result.chunk.text) => {
                    Some((n, FlagReason::Unsupported))
                }
                Some(_) => None,
            })
            .collect();

        if rejected.is_empty() {
            kept.push_str(sentence);
            continue;
        }

        let action = match strictness {
            FactCheckStrictness::StripCitation => {
                kept.push_str(&retain_citations(sentence, |n| {
                    !rejected.iter().any(|(r, _)| *r == n)
                }));
                FlagAction::CitationStripped
            }
            FactCheckStrictness::RemoveClaim => FlagAction::ClaimRemoved,
        };
        for (citation, reason) in rejected {
            flags.push(CitationFlag {
                citation,
                claim: claim.clone(),
                reason,
                action,
            });
        }
    }

    let (text, citation_map) = renumber(kept.trim());
    if text.trim().is_empty() {
        return Err(EngineError::CitationViolation(format!(
            "all {} cited claims were unsupported by their sources",
            flags.len()
        )));
    }

    if !flags.is_empty() {
        tracing::info!(
            corrected = flags.len(),
            remaining = citation_map.len(),
            "fact check corrected citations"
        );
    }

    Ok(FactCheckOutcome {
        text,
        citation_map,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::{citation_set, is_gapless};
    use crate::context::assemble;
    use crate::models::{Chunk, RetrievalResult};
    use proptest::prelude::*;

    fn block(texts: &[&str]) -> ContextBlock {
        let results = texts
            .iter()
            .enumerate()
            .map(|(i, t)| RetrievalResult {
                chunk: Chunk {
                    id: format!("c{}", i),
                    source: format!("doc{}.md", i),
                    position: 0,
                    text: t.to_string(),
                },
                keyword_score: 1.0,
                vector_score: 1.0,
                fused_score: 1.0,
                metadata: None,
            })
            .collect();
        assemble(results, texts.len())
    }

    fn sample_block() -> ContextBlock {
        block(&[
            "Gradient descent minimizes a loss function by following its negative gradient.",
            "Transformers process tokens in parallel using self-attention.",
            "Dropout randomly disables neurons during training to reduce overfitting.",
        ])
    }

    #[test]
    fn test_verifier_substring_and_overlap() {
        let v = TermOverlapVerifier::default();
        let passage = "Transformers process tokens in parallel using self-attention.";
        assert!(v.supports("Transformers process tokens in parallel.", passage));
        assert!(v.supports("Self-attention lets transformers process tokens.", passage));
        assert!(!v.supports("Volcanoes erupt molten basalt rock.", passage));
        assert!(!v.supports("", passage));
    }

    #[test]
    fn test_supported_claims_untouched() {
        let text = "Gradient descent follows the negative gradient [1]. \
                    Transformers use self-attention [2].";
        let out = fact_check(text, &sample_block(), &TermOverlapVerifier::default(), Default::default())
            .unwrap();
        assert_eq!(out.text, text);
        assert_eq!(out.citation_map, vec![1, 2]);
        assert!(out.flags.is_empty());
    }

    #[test]
    fn test_unsupported_citation_stripped_and_renumbered() {
        let text = "Volcanoes erupt molten basalt rock [1]. \
                    Dropout disables neurons during training [3].";
        let out = fact_check(text, &sample_block(), &TermOverlapVerifier::default(), FactCheckStrictness::StripCitation)
            .unwrap();
        assert_eq!(
            out.text,
            "Volcanoes erupt molten basalt rock. Dropout disables neurons during training [1]."
        );
        assert_eq!(out.citation_map, vec![3]);
        assert_eq!(out.flags.len(), 1);
        assert_eq!(out.flags[0].citation, 1);
        assert_eq!(out.flags[0].reason, FlagReason::Unsupported);
        assert_eq!(out.flags[0].action, FlagAction::CitationStripped);
    }

    #[test]
    fn test_remove_claim_drops_sentence() {
        let text = "Volcanoes erupt molten basalt rock [2]. \
                    Dropout disables neurons during training [3].";
        let out = fact_check(text, &sample_block(), &TermOverlapVerifier::default(), FactCheckStrictness::RemoveClaim)
            .unwrap();
        assert_eq!(out.text, "Dropout disables neurons during training [1].");
        assert_eq!(out.flags[0].action, FlagAction::ClaimRemoved);
    }

    #[test]
    fn test_out_of_range_marker_flagged() {
        let text = "Dropout disables neurons during training [7].";
        let out = fact_check(text, &sample_block(), &TermOverlapVerifier::default(), Default::default())
            .unwrap();
        assert_eq!(out.text, "Dropout disables neurons during training.");
        assert!(out.citation_map.is_empty());
        assert_eq!(out.flags[0].reason, FlagReason::OutOfRange);
    }

    #[test]
    fn test_nothing_left_is_citation_violation() {
        let text = "Volcanoes erupt molten basalt rock [1].";
        let err = fact_check(text, &sample_block(), &TermOverlapVerifier::default(), FactCheckStrictness::RemoveClaim)
            .unwrap_err();
        assert!(matches!(err, EngineError::CitationViolation(_)));
    }

    proptest! {
        #[test]
        fn prop_output_citations_gapless_and_in_range(
            picks in proptest::collection::vec((0usize..6, any::<bool>()), 1..10)
        ) {
            let b = sample_block();
            let claims = [
                "Gradient descent follows the negative gradient",
                "Transformers use self-attention on tokens",
                "Dropout disables neurons during training",
                "Volcanoes erupt molten basalt rock",
            ];
            let text: String = picks
                .iter()
                .enumerate()
                .map(|(i, (n, _))| format!("{} [{}]. ", claims[i % claims.len()], n))
                .collect();
            let strictness = if picks[0].1 {
                FactCheckStrictness::RemoveClaim
            } else {
                FactCheckStrictness::StripCitation
            };
            if let Ok(out) = fact_check(&text, &b, &TermOverlapVerifier::default(), strictness) {
                let set = citation_set(&out.text);
                prop_assert!(is_gapless(&set));
                prop_assert_eq!(set.len(), out.citation_map.len());
                for original in &out.citation_map {
                    prop_assert!(b.get(*original).is_some());
                }
            }
        }
    }
}
