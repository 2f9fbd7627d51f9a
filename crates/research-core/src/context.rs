//! Context assembly: ranked chunks → numbered, source-attributed block.
//!
//! [`ContextBlock::has_sources`] is computed from the number of retrieval
//! results and is the only signal downstream code may use to choose the
//! pipeline mode. The rendered text carries guidance headers (with warning
//! glyphs) for the generating model; those headers are decoration and are
//! never inspected to decide whether context exists. An empty block renders
//! as the dedicated [`NO_SOURCES_SENTINEL`] and nothing else.

use serde::Serialize;

use crate::models::{PipelineMode, RetrievalResult};

/// Rendering of a block built from zero results.
pub const NO_SOURCES_SENTINEL: &str = "[[NO_SOURCES_AVAILABLE]]";

const GUIDANCE_HEADER: &str = "\
⚠️ USE ONLY THE SOURCES LISTED BELOW ⚠️
Cite every factual statement with the number of the source that supports it, in square brackets, e.g. [1].
⚠️ Never invent citations and never cite a number that is not listed here. ⚠️";

/// One numbered passage.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    /// 1-based citation number.
    pub index: usize,
    pub result: RetrievalResult,
}

/// Numbered context for exactly one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    entries: Vec<ContextEntry>,
    has_sources: bool,
    rendered: String,
}

impl ContextBlock {
    /// Whether retrieval produced at least one passage.
    pub fn has_sources(&self) -> bool {
        self.has_sources
    }

    /// Mode the pipeline must run in for this block.
    pub fn mode(&self) -> PipelineMode {
        if self.has_sources {
            PipelineMode::Strict
        } else {
            PipelineMode::Fallback
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for citation number `index` (1-based).
    pub fn get(&self, index: usize) -> Option<&ContextEntry> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
    }

    /// Prompt-ready rendering.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// Passage texts in citation order (`passages()[i]` is citation `i + 1`).
    pub fn passages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.result.chunk.text.clone())
            .collect()
    }
}

/// Number at most `top_k` ranked results and render them.
pub fn assemble(results: Vec<RetrievalResult>, top_k: usize) -> ContextBlock {
    let entries: Vec<ContextEntry> = results
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, result)| ContextEntry {
            index: i + 1,
            result,
        })
        .collect();

    let has_sources = !entries.is_empty();
    let rendered = if has_sources {
        render(&entries)
    } else {
        NO_SOURCES_SENTINEL.to_string()
    };

    ContextBlock {
        entries,
        has_sources,
        rendered,
    }
}

fn render(entries: &[ContextEntry]) -> String {
    let mut out = String::from(GUIDANCE_HEADER);
    out.push_str("\n\n");
    for e in entries {
        let chunk = &e.result.chunk;
        out.push_str(&format!(
            "[{}] Source: {} (passage {})",
            e.index, chunk.source, chunk.position
        ));
        if let Some(meta) = &e.result.metadata {
            if !meta.authors.is_empty() {
                out.push_str(&format!("; Authors: {}", meta.authors.join(", ")));
            }
            if let Some(date) = &meta.date {
                out.push_str(&format!("; Date: {}", date));
            }
        }
        out.push('\n');
        out.push_str(chunk.text.trim());
        out.push_str("\n\n");
    }
    out.push_str(&format!(
        "Available citation numbers: 1 to {}.",
        entries.len()
    ));
    out
}
