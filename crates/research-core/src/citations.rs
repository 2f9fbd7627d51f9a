//! Citation-marker utilities: parsing `[n]` markers, stripping or filtering
//! them, gapless renumbering, and sentence-level citation coverage.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::text::split_sentences;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9]{1,4})\]").expect("static citation regex"));

static MARKER_WITH_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*\[([0-9]{1,4})\]").expect("static citation regex"));

fn marker_number(caps: &Captures<'_>) -> usize {
    caps[1].parse().unwrap_or(0)
}

/// Citation numbers in order of appearance, repeats included.
pub fn citation_numbers(text: &str) -> Vec<usize> {
    MARKER.captures_iter(text).map(|c| marker_number(&c)).collect()
}

/// Distinct citation numbers.
pub fn citation_set(text: &str) -> BTreeSet<usize> {
    citation_numbers(text).into_iter().collect()
}

pub fn has_citations(text: &str) -> bool {
    MARKER.is_match(text)
}

/// Remove every marker together with the spaces in front of it.
pub fn strip_citations(text: &str) -> String {
    MARKER_WITH_SPACE.replace_all(text, "").into_owned()
}

/// Remove markers for which `keep` returns false.
pub fn retain_citations(text: &str, keep: impl Fn(usize) -> bool) -> String {
    MARKER_WITH_SPACE
        .replace_all(text, |caps: &Captures<'_>| {
            if keep(marker_number(caps)) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Renumber markers to `1..=m` in order of first appearance and collapse
/// immediately repeated markers (`[2][2]`).
///
/// Returns the rewritten text and the citation map: `map[k - 1]` is the
/// original number that new citation `k` replaced.
pub fn renumber(text: &str) -> (String, Vec<usize>) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for n in citation_numbers(text) {
        if !mapping.contains_key(&n) {
            order.push(n);
            mapping.insert(n, order.len());
        }
    }

    let rewritten = MARKER.replace_all(text, |caps: &Captures<'_>| {
        let original = marker_number(caps);
        format!("[{}]", mapping.get(&original).copied().unwrap_or(original))
    });

    let mut collapsed = rewritten.into_owned();
    for k in 1..=order.len() {
        let doubled = format!("[{k}][{k}]");
        let single = format!("[{k}]");
        while collapsed.contains(&doubled) {
            collapsed = collapsed.replace(&doubled, &single);
        }
    }
    (collapsed, order)
}

/// Whether `set` is exactly `{1, 2, …, n}` for some `n ≥ 0`.
pub fn is_gapless(set: &BTreeSet<usize>) -> bool {
    set.iter().enumerate().all(|(i, n)| *n == i + 1)
}

/// Sentence text without markers, trimmed.
pub fn claim_text(sentence: &str) -> String {
    strip_citations(sentence).trim().to_string()
}

/// A sentence counts as a factual statement when it has at least
/// `min_words` words and is neither a question nor a markdown heading.
pub fn is_factual_sentence(sentence: &str, min_words: usize) -> bool {
    let claim = claim_text(sentence);
    if claim.is_empty() || claim.starts_with('#') || claim.ends_with('?') {
        return false;
    }
    claim.split_whitespace().count() >= min_words
}

/// Cited factual sentences divided by factual sentences; `0.0` when the
/// text contains no factual sentence.
pub fn citation_coverage(text: &str, min_words: usize) -> f64 {
    let mut factual = 0usize;
    let mut cited = 0usize;
    for sentence in split_sentences(text) {
        if !is_factual_sentence(sentence, min_words) {
            continue;
        }
        factual += 1;
        if has_citations(sentence) {
            cited += 1;
        }
    }
    if factual == 0 {
        0.0
    } else {
        cited as f64 / factual as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_non_ascii_digits_are_not_markers() {
        let text = "Energy is conserved [\u{0663}].";
        assert!(!has_citations(text));
        assert!(citation_numbers(text).is_empty());
        assert_eq!(strip_citations(text), text);
    }

    #[test]
    fn test_numbers_and_set() {
        let text = "A [2]. B [1][2]. C [10].";
        assert_eq!(citation_numbers(text), vec![2, 1, 2, 10]);
        assert_eq!(citation_set(text).into_iter().collect::<Vec<_>>(), vec![1, 2, 10]);
    }

    #[test]
    fn test_strip_and_retain() {
        assert_eq!(strip_citations("Claim [1]. Other [2] text."), "Claim. Other text.");
        assert_eq!(
            retain_citations("A [1]. B [4]. C [2].", |n| n <= 3),
            "A [1]. B. C [2]."
        );
    }

    #[test]
    fn test_renumber_closes_gaps() {
        let (text, map) = renumber("X [3]. Y [1]. Z [3][3].");
        assert_eq!(text, "X [1]. Y [2]. Z [1].");
        assert_eq!(map, vec![3, 1]);
        assert!(is_gapless(&citation_set(&text)));
    }

    #[test]
    fn test_gapless() {
        assert!(is_gapless(&BTreeSet::new()));
        assert!(is_gapless(&[1, 2, 3].into_iter().collect()));
        assert!(!is_gapless(&[1, 3].into_iter().collect()));
        assert!(!is_gapless(&[2].into_iter().collect()));
    }

    #[test]
    fn test_coverage() {
        let text = "Rust guarantees memory safety [1]. Cargo builds every crate quickly. Why?";
        assert!((citation_coverage(text, 4) - 0.5).abs() < 1e-9);
        assert_eq!(citation_coverage("Short.", 4), 0.0);
        assert_eq!(
            citation_coverage("Tokio schedules tasks cooperatively [2].", 4),
            1.0
        );
    }

    proptest! {
        #[test]
        fn prop_renumber_is_gapless(nums in proptest::collection::vec(1usize..30, 0..12)) {
            let text: String = nums.iter().map(|n| format!("Claim about item [{}]. ", n)).collect();
            let (out, map) = renumber(&text);
            let set = citation_set(&out);
            prop_assert!(is_gapless(&set));
            prop_assert_eq!(set.len(), map.len());
        }
    }
}
