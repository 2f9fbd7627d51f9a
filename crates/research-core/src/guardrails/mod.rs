//! Input and output guardrails.
//!
//! The input gate runs before retrieval: length bounds, prompt-injection
//! patterns and personal data. The output gate runs on the final answer:
//! citation coverage against a target, uncertainty phrasing, a length band
//! and harmful content.
//!
//! Every finding is either a *violation* (the gate fails) or a *warning*
//! (recorded, the gate passes). With `strict_mode` enabled every warning is
//! promoted to a violation.
//!
//! Rule names prefix each message (`"pii: email address detected"`) so a
//! rejection always names the rule that fired.

pub mod patterns;

use serde::{Deserialize, Serialize};

use crate::citations::citation_coverage;
use crate::error::{Direction, EngineError, EngineResult};
use crate::models::PipelineMode;

use patterns::{uncertainty_markers, HARMFUL_PATTERNS, INJECTION_PATTERNS, PII_PATTERNS};

/// Guardrail thresholds from the `[guardrails]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default = "default_citation_target")]
    pub citation_target: f64,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
    /// Sentences shorter than this are not counted as factual claims.
    #[serde(default = "default_min_claim_words")]
    pub min_claim_words: usize,
}

fn default_max_query_chars() -> usize {
    10_000
}

fn default_citation_target() -> f64 {
    0.9
}

fn default_min_answer_chars() -> usize {
    20
}

fn default_max_answer_chars() -> usize {
    20_000
}

fn default_min_claim_words() -> usize {
    4
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_query_chars: default_max_query_chars(),
            citation_target: default_citation_target(),
            min_answer_chars: default_min_answer_chars(),
            max_answer_chars: default_max_answer_chars(),
            min_claim_words: default_min_claim_words(),
        }
    }
}

/// Outcome of one gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Convert a failed gate into [`EngineError::GuardrailsRejected`].
    pub fn into_result(self, direction: Direction) -> EngineResult<Vec<String>> {
        if self.passed {
            Ok(self.warnings)
        } else {
            Err(EngineError::GuardrailsRejected {
                direction,
                violations: self.violations,
            })
        }
    }
}

#[derive(Default)]
struct Findings {
    violations: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn finish(mut self, strict_mode: bool) -> ValidationResult {
        if strict_mode {
            self.violations.append(&mut self.warnings);
        }
        ValidationResult {
            passed: self.violations.is_empty(),
            violations: self.violations,
            warnings: self.warnings,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardrailsValidator {
    config: GuardrailsConfig,
}

impl GuardrailsValidator {
    pub fn new(config: GuardrailsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardrailsConfig {
        &self.config
    }

    /// Validate `text` in the given direction. Output text is checked as a
    /// strict-mode answer; use [`validate_output`](Self::validate_output)
    /// for fallback answers.
    pub fn validate(&self, text: &str, direction: Direction) -> ValidationResult {
        match direction {
            Direction::Input => self.validate_input(text),
            Direction::Output => self.validate_output(text, PipelineMode::Strict),
        }
    }

    pub fn validate_input(&self, query: &str) -> ValidationResult {
        let mut f = Findings::default();

        let len = query.chars().count();
        if query.trim().is_empty() {
            f.violations.push("length: query is empty".to_string());
        } else if len > self.config.max_query_chars {
            f.violations.push(format!(
                "length: query has {} characters, limit is {}",
                len, self.config.max_query_chars
            ));
        }

        for p in INJECTION_PATTERNS {
            if p.find(query).is_some() {
                f.violations
                    .push(format!("prompt_injection: {} detected", p.name));
            }
        }
        for p in PII_PATTERNS {
            if p.find(query).is_some() {
                f.violations.push(format!("pii: {} detected", p.name));
            }
        }

        let result = f.finish(self.config.strict_mode);
        log_outcome(Direction::Input, &result);
        result
    }

    /// Validate a final answer. Citation coverage is only meaningful for
    /// strict-mode answers; fallback answers carry no citations by contract.
    pub fn validate_output(&self, answer: &str, mode: PipelineMode) -> ValidationResult {
        let mut f = Findings::default();

        for p in HARMFUL_PATTERNS {
            if p.find(answer).is_some() {
                f.violations
                    .push(format!("harmful_content: {} detected", p.name));
            }
        }

        if mode == PipelineMode::Strict {
            let coverage = citation_coverage(answer, self.config.min_claim_words);
            if coverage < self.config.citation_target {
                f.warnings.push(format!(
                    "citation_coverage: {:.0}% of factual sentences cited, target {:.0}%",
                    coverage * 100.0,
                    self.config.citation_target * 100.0
                ));
            }
        }

        let markers = uncertainty_markers(answer);
        if !markers.is_empty() {
            f.warnings.push(format!(
                "hallucination_marker: uncertain phrasing ({})",
                markers.join(", ")
            ));
        }

        let len = answer.chars().count();
        if len < self.config.min_answer_chars {
            f.warnings.push(format!(
                "length: answer has {} characters, expected at least {}",
                len, self.config.min_answer_chars
            ));
        } else if len > self.config.max_answer_chars {
            f.warnings.push(format!(
                "length: answer has {} characters, expected at most {}",
                len, self.config.max_answer_chars
            ));
        }

        let result = f.finish(self.config.strict_mode);
        log_outcome(Direction::Output, &result);
        result
    }
}

fn log_outcome(direction: Direction, result: &ValidationResult) {
    if !result.passed {
        tracing::warn!(
            %direction,
            violations = ?result.violations,
            "guardrails rejected"
        );
    } else if !result.warnings.is_empty() {
        tracing::warn!(%direction, warnings = ?result.warnings, "guardrails warnings");
    }
}
