//! Text helpers shared by chunking, fusion, citation checks and metrics:
//! whitespace normalization, content-term extraction and a sentence
//! splitter that keeps trailing citation markers attached to their claim.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "his", "how", "its", "may", "who", "did", "get", "him", "she",
    "too", "use", "that", "with", "have", "this", "will", "your", "from", "they", "been",
    "were", "what", "when", "which", "their", "there", "about", "would", "these", "other",
    "into", "than", "then", "them", "some", "such", "only", "also", "more", "most", "very",
    "does", "each", "over", "under", "between", "where", "while", "being", "both", "used",
    "der", "die", "das", "und", "ist", "ein", "eine", "les", "des", "une", "est", "los",
    "las", "una", "por", "con", "para",
];

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric terms of length ≥ 3 with stopwords removed,
/// in order of appearance (duplicates kept).
pub fn content_terms(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Distinct content terms.
pub fn term_set(s: &str) -> HashSet<String> {
    content_terms(s).into_iter().collect()
}

/// Fraction of `needle`'s distinct terms that also occur in `haystack`.
///
/// Returns `0.0` when `needle` has no content terms.
pub fn term_overlap(needle: &str, haystack: &str) -> f64 {
    let wanted = term_set(needle);
    if wanted.is_empty() {
        return 0.0;
    }
    let present = term_set(haystack);
    let hits = wanted.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / wanted.len() as f64
}

/// Length in bytes of a `[digits]` marker at the start of `s`, if any.
pub(crate) fn citation_marker_len(s: &str) -> Option<usize> {
    let rest = s.strip_prefix('[')?;
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || rest.as_bytes().get(digits) != Some(&b']') {
        return None;
    }
    Some(digits + 2)
}

/// Split text into sentence segments.
///
/// Segments cover the input exactly: concatenating them reproduces `text`.
/// A segment ends after `.`, `!` or `?` followed by whitespace (or end of
/// text), or after a line break. Closing quotes/brackets and citation
/// markers directly following the terminator stay in the same segment,
/// so `"Claim. [2] Next"` splits as `"Claim. [2] "` and `"Next"`.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < text.len() {
        let ch = match text[i..].chars().next() {
            Some(c) => c,
            None => break,
        };
        let ch_len = ch.len_utf8();

        if ch == '\n' {
            let mut end = i + ch_len;
            while end < text.len() && text[end..].starts_with(char::is_whitespace) {
                end += text[end..].chars().next().map(char::len_utf8).unwrap_or(1);
            }
            segments.push(&text[start..end]);
            start = end;
            i = end;
            continue;
        }

        if matches!(ch, '.' | '!' | '?') {
            let mut end = i + ch_len;
            loop {
                let rest = &text[end..];
                if let Some(c) = rest.chars().next().filter(|c| "\"')]”’".contains(*c)) {
                    end += c.len_utf8();
                    continue;
                }
                let spaces = rest.len() - rest.trim_start_matches(' ').len();
                if let Some(marker) = citation_marker_len(&rest[spaces..]) {
                    end += spaces + marker;
                    continue;
                }
                break;
            }
            let at_boundary = end >= text.len() || text[end..].starts_with(char::is_whitespace);
            if at_boundary {
                while end < text.len() && text[end..].starts_with(char::is_whitespace) {
                    end += text[end..].chars().next().map(char::len_utf8).unwrap_or(1);
                }
                segments.push(&text[start..end]);
                start = end;
                i = end;
                continue;
            }
            i = end;
            continue;
        }

        i += ch_len;
    }

    if start < text.len() {
        segments.push(&text[start..]);
    }
    segments
}
