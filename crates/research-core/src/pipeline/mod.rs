//! The Writer → Reviewer → FactChecker agent pipeline.
//!
//! A run is an explicit state machine:
//!
//! ```text
//! Draft ──writer──▶ Reviewed ──reviewer──▶ FactChecked ──fact check──▶ Done
//! ```
//!
//! Each state names the artifact the next [`PipelineRun::step`] produces.
//! The [`PipelineMode`] is taken from [`ContextBlock::mode`] when the run is
//! created and never changes afterwards.
//!
//! Stage postconditions are enforced on the generated text rather than
//! requested in the prompt only:
//!
//! - **Writer**: fallback drafts lose every citation marker and open with
//!   the localized caveat; strict drafts lose markers outside the block.
//! - **Reviewer**: markers the writer did not introduce are removed; a review
//!   that drops one of the writer's citations is discarded in favour of the
//!   draft.
//! - **FactChecker** (strict only): see [`fact_check`](fact_check::fact_check).
//!   In fallback mode `fact_checked = reviewed`.
//!
//! Empty stage output is [`EngineError::Generation`]; the run stops there.

pub mod fact_check;
pub mod prompts;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::citations::{
    citation_numbers, citation_set, claim_text, retain_citations, strip_citations,
};
use crate::context::ContextBlock;
use crate::error::{EngineError, EngineResult, Stage};
use crate::generation::Generator;
use crate::models::{Language, PipelineMode};
use crate::text::split_sentences;

use fact_check::{
    fact_check, CitationFlag, ClaimVerifier, FactCheckStrictness, FlagAction, FlagReason,
    TermOverlapVerifier,
};

/// `[pipeline]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub fact_check: FactCheckStrictness,
    /// Threshold for the default [`TermOverlapVerifier`].
    #[serde(default = "default_min_support_overlap")]
    pub min_support_overlap: f64,
}

fn default_min_support_overlap() -> f64 {
    0.5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fact_check: FactCheckStrictness::default(),
            min_support_overlap: default_min_support_overlap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Draft,
    Reviewed,
    FactChecked,
    Done,
}

/// Everything the pipeline produced for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTranscript {
    pub draft: String,
    pub reviewed: String,
    pub fact_checked: String,
    /// Citation numbers present in `fact_checked` (always `1..=m`).
    pub citations_used: BTreeSet<usize>,
    /// `citation_map[k - 1]` is the context entry cited as `[k]`.
    pub citation_map: Vec<usize>,
    pub flags: Vec<CitationFlag>,
    pub mode: PipelineMode,
}

impl AgentTranscript {
    fn new(mode: PipelineMode) -> Self {
        Self {
            draft: String::new(),
            reviewed: String::new(),
            fact_checked: String::new(),
            citations_used: BTreeSet::new(),
            citation_map: Vec::new(),
            flags: Vec::new(),
            mode,
        }
    }
}

/// A finished run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub transcript: AgentTranscript,
    /// Wall-clock seconds per stage, keyed by stage name.
    pub stage_times: BTreeMap<String, f64>,
}

/// Shared, immutable pipeline dependencies. Cheap to clone.
#[derive(Clone)]
pub struct AgentPipeline {
    generator: Arc<dyn Generator>,
    verifier: Arc<dyn ClaimVerifier>,
    config: PipelineConfig,
}

impl AgentPipeline {
    /// Pipeline with the default term-overlap verifier.
    pub fn new(generator: Arc<dyn Generator>, config: PipelineConfig) -> Self {
        let verifier = Arc::new(TermOverlapVerifier::new(config.min_support_overlap));
        Self {
            generator,
            verifier,
            config,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ClaimVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn verifier(&self) -> &dyn ClaimVerifier {
        self.verifier.as_ref()
    }

    /// Begin a run over `block`. The mode is fixed here.
    pub fn start<'a>(
        &'a self,
        query: &'a str,
        language: Language,
        block: &'a ContextBlock,
    ) -> PipelineRun<'a> {
        let mode = block.mode();
        tracing::debug!(?mode, sources = block.len(), "pipeline run started");
        PipelineRun {
            pipeline: self,
            query,
            language,
            block,
            state: PipelineState::Draft,
            transcript: AgentTranscript::new(mode),
            stage_times: BTreeMap::new(),
        }
    }

    /// Run all stages to completion.
    pub async fn run(
        &self,
        query: &str,
        language: Language,
        block: &ContextBlock,
    ) -> EngineResult<PipelineOutput> {
        self.start(query, language, block).run().await
    }
}

/// One in-progress pipeline run, owned by a single query.
pub struct PipelineRun<'a> {
    pipeline: &'a AgentPipeline,
    query: &'a str,
    language: Language,
    block: &'a ContextBlock,
    state: PipelineState,
    transcript: AgentTranscript,
    stage_times: BTreeMap<String, f64>,
}

impl<'a> PipelineRun<'a> {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn mode(&self) -> PipelineMode {
        self.transcript.mode
    }

    pub fn transcript(&self) -> &AgentTranscript {
        &self.transcript
    }

    /// Execute the stage for the current state and advance.
    pub async fn step(&mut self) -> EngineResult<PipelineState> {
        let started = Instant::now();
        let stage = match self.state {
            PipelineState::Draft => {
                self.write().await?;
                self.state = PipelineState::Reviewed;
                Stage::Writer
            }
            PipelineState::Reviewed => {
                self.review().await?;
                self.state = PipelineState::FactChecked;
                Stage::Reviewer
            }
            PipelineState::FactChecked => {
                self.check()?;
                self.state = PipelineState::Done;
                Stage::FactChecker
            }
            PipelineState::Done => return Ok(PipelineState::Done),
        };
        let secs = started.elapsed().as_secs_f64();
        tracing::info!(stage = stage.as_str(), secs, "pipeline stage finished");
        self.stage_times.insert(stage.as_str().to_string(), secs);
        Ok(self.state)
    }

    pub async fn run(mut self) -> EngineResult<PipelineOutput> {
        while self.state != PipelineState::Done {
            self.step().await?;
        }
        Ok(PipelineOutput {
            transcript: self.transcript,
            stage_times: self.stage_times,
        })
    }

    async fn generate(&self, stage: Stage, prompt: &str) -> EngineResult<String> {
        let text = self.pipeline.generator.generate(prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::generation(stage, "empty response"));
        }
        Ok(text.to_string())
    }

    async fn write(&mut self) -> EngineResult<()> {
        let mode = self.mode();
        let prompt = prompts::writer_prompt(self.query, self.block, mode, self.language);
        let raw = self.generate(Stage::Writer, &prompt).await?;

        let draft = match mode {
            PipelineMode::Fallback => self.enforce_fallback(&raw),
            PipelineMode::Strict => {
                let len = self.block.len();
                let out_of_range: BTreeSet<usize> = citation_set(&raw)
                    .into_iter()
                    .filter(|n| *n == 0 || *n > len)
                    .collect();
                self.flag_all(&raw, &out_of_range, FlagReason::OutOfRange);
                retain_citations(&raw, |n| !out_of_range.contains(&n))
                    .trim()
                    .to_string()
            }
        };
        if draft.is_empty() {
            return Err(EngineError::generation(
                Stage::Writer,
                "draft empty after citation enforcement",
            ));
        }
        self.transcript.draft = draft;
        Ok(())
    }

    async fn review(&mut self) -> EngineResult<()> {
        let mode = self.mode();
        let prompt = prompts::reviewer_prompt(
            self.query,
            &self.transcript.draft,
            self.block,
            mode,
            self.language,
        );
        let raw = self.generate(Stage::Reviewer, &prompt).await?;

        let reviewed = match mode {
            PipelineMode::Fallback => self.enforce_fallback(&raw),
            PipelineMode::Strict => {
                let writer_set = citation_set(&self.transcript.draft);
                let added: BTreeSet<usize> = citation_set(&raw)
                    .difference(&writer_set)
                    .copied()
                    .collect();
                self.flag_all(&raw, &added, FlagReason::NotInDraft);
                let cleaned = retain_citations(&raw, |n| writer_set.contains(&n))
                    .trim()
                    .to_string();
                if citation_set(&cleaned) == writer_set {
                    cleaned
                } else {
                    tracing::warn!(
                        expected = ?writer_set,
                        "reviewer dropped writer citations; keeping draft"
                    );
                    self.transcript.draft.clone()
                }
            }
        };
        if reviewed.is_empty() {
            return Err(EngineError::generation(
                Stage::Reviewer,
                "review empty after citation enforcement",
            ));
        }
        self.transcript.reviewed = reviewed;
        Ok(())
    }

    fn check(&mut self) -> EngineResult<()> {
        match self.mode() {
            PipelineMode::Fallback => {
                self.transcript.fact_checked = self.transcript.reviewed.clone();
            }
            PipelineMode::Strict => {
                let outcome = fact_check(
                    &self.transcript.reviewed,
                    self.block,
                    self.pipeline.verifier.as_ref(),
                    self.pipeline.config.fact_check,
                )?;
                self.transcript.citations_used = outcome.citations_used();
                self.transcript.fact_checked = outcome.text;
                self.transcript.citation_map = outcome.citation_map;
                self.transcript.flags.extend(outcome.flags);
            }
        }
        Ok(())
    }

    /// Strip every marker and make sure the localized caveat opens the text.
    fn enforce_fallback(&mut self, raw: &str) -> String {
        let fabricated = citation_set(raw);
        if !fabricated.is_empty() {
            tracing::warn!(markers = ?fabricated, "citation markers removed from fallback answer");
            self.flag_all(raw, &fabricated, FlagReason::FallbackMode);
        }
        let body = strip_citations(raw).trim().to_string();
        let caveat = self.language.fallback_caveat();
        if body.starts_with(caveat) {
            body
        } else {
            let rest = body.replacen(caveat, "", 1);
            let rest = rest.trim();
            if rest.is_empty() {
                caveat.to_string()
            } else {
                format!("{}\n\n{}", caveat, rest)
            }
        }
    }

    fn flag_all(&mut self, text: &str, numbers: &BTreeSet<usize>, reason: FlagReason) {
        if numbers.is_empty() {
            return;
        }
        for sentence in split_sentences(text) {
            let mut seen = BTreeSet::new();
            for n in citation_numbers(sentence) {
                if numbers.contains(&n) && seen.insert(n) {
                    self.transcript.flags.push(CitationFlag {
                        citation: n,
                        claim: claim_text(sentence),
                        reason,
                        action: FlagAction::CitationStripped,
                    });
                }
            }
        }
    }
}
