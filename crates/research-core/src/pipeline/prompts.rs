//! Prompt templates for the writer and reviewer stages.
//!
//! The reviewer receives the draft between [`DRAFT_OPEN`] and
//! [`DRAFT_CLOSE`] delimiter lines.

use crate::context::{ContextBlock, NO_SOURCES_SENTINEL};
use crate::models::{Language, PipelineMode};

pub const DRAFT_OPEN: &str = "<<<DRAFT";
pub const DRAFT_CLOSE: &str = "DRAFT>>>";

pub fn writer_prompt(
    query: &str,
    block: &ContextBlock,
    mode: PipelineMode,
    language: Language,
) -> String {
    match mode {
        PipelineMode::Strict => format!(
            "You are a research writer. Answer the question using only the numbered sources below.\n\
             Rules:\n\
             - Support every factual sentence with the number of its source in square brackets, e.g. [1].\n\
             - Use only the citation numbers 1 to {n}. Do not invent sources or numbers.\n\
             - If the sources do not answer part of the question, say so instead of guessing.\n\
             - Write the answer in {lang}.\n\n\
             QUESTION:\n{query}\n\n\
             SOURCES:\n{sources}\n\n\
             ANSWER:",
            n = block.len(),
            lang = language.display_name(),
            query = query.trim(),
            sources = block.rendered(),
        ),
        PipelineMode::Fallback => format!(
            "You are a research writer. No sources are available for this question ({sentinel}).\n\
             Rules:\n\
             - Begin the answer with exactly this caveat: \"{caveat}\"\n\
             - Give brief general background only.\n\
             - Do not include any citation markers such as [1].\n\
             - Write the answer in {lang}.\n\n\
             QUESTION:\n{query}\n\n\
             ANSWER:",
            sentinel = NO_SOURCES_SENTINEL,
            caveat = language.fallback_caveat(),
            lang = language.display_name(),
            query = query.trim(),
        ),
    }
}

pub fn reviewer_prompt(
    query: &str,
    draft: &str,
    block: &ContextBlock,
    mode: PipelineMode,
    language: Language,
) -> String {
    let citation_rule = match mode {
        PipelineMode::Strict => format!(
            "- Keep every citation marker exactly as written and attached to its sentence. \
             Do not add numbers; only 1 to {} exist.",
            block.len()
        ),
        PipelineMode::Fallback => {
            "- The draft has no sources. Keep its opening caveat and add no citation markers."
                .to_string()
        }
    };
    format!(
        "You are an editor. Improve the clarity and grammar of the draft answer below.\n\
         Rules:\n\
         - Do not add, remove or change any factual claim.\n\
         {citation_rule}\n\
         - Keep the answer in {lang}.\n\
         - Reply with the revised answer only.\n\n\
         QUESTION:\n{query}\n\n\
         {open}\n{draft}\n{close}",
        citation_rule = citation_rule,
        lang = language.display_name(),
        query = query.trim(),
        open = DRAFT_OPEN,
        draft = draft.trim(),
        close = DRAFT_CLOSE,
    )
}

/// The draft embedded in a reviewer prompt.
pub fn embedded_draft(prompt: &str) -> Option<&str> {
    let start = prompt.find(DRAFT_OPEN)? + DRAFT_OPEN.len();
    let end = prompt.rfind(DRAFT_CLOSE)?;
    prompt.get(start..end).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::assemble;

    #[test]
    fn test_fallback_writer_prompt_carries_caveat_and_sentinel() {
        let block = assemble(Vec::new(), 5);
        let p = writer_prompt("What is ML?", &block, PipelineMode::Fallback, Language::De);
        assert!(p.contains(NO_SOURCES_SENTINEL));
        assert!(p.contains(Language::De.fallback_caveat()));
        assert!(p.contains("German"));
    }

    #[test]
    fn test_reviewer_prompt_round_trips_draft() {
        let block = assemble(Vec::new(), 5);
        let draft = "First line [1].\nSecond line [2].";
        let p = reviewer_prompt("q", draft, &block, PipelineMode::Strict, Language::En);
        assert_eq!(embedded_draft(&p), Some(draft));
        assert_eq!(embedded_draft("no markers here"), None);
    }
}
