use std::fmt;

use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Which guardrail gate produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Pipeline stage names used in errors and timing metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Writer,
    Reviewer,
    FactChecker,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Writer => "writer",
            Stage::Reviewer => "reviewer",
            Stage::FactChecker => "fact_checker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy of the research query engine.
///
/// `ContextUnavailable` is deliberately absent: an empty retrieval result is
/// not an error, it switches the pipeline into fallback mode.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request, rejected before any processing. Never retried.
    #[error("{0}")]
    Validation(String),

    /// A guardrail gate blocked the request or the answer.
    #[error("{direction} guardrails rejected the request: {}", violations.join("; "))]
    GuardrailsRejected {
        direction: Direction,
        violations: Vec<String>,
    },

    /// The retrieval index could not be reached.
    #[error("retrieval backend unavailable: {0}")]
    Retrieval(String),

    /// A pipeline stage produced no usable output.
    #[error("{stage} stage produced no usable output: {detail}")]
    Generation { stage: Stage, detail: String },

    /// Fact checking left no supportable content to return.
    #[error("citation check failed: {0}")]
    CitationViolation(String),

    /// Timeout or transient backend failure after retries.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// HTTP-style status category for the uniform `{detail}` error shape.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::GuardrailsRejected { .. }
            | EngineError::CitationViolation(_) => 400,
            EngineError::NotFound(_) => 404,
            EngineError::Retrieval(_) | EngineError::ServiceUnavailable(_) => 503,
            EngineError::Generation { .. } | EngineError::Internal(_) => 500,
        }
    }

    /// Transient failures are retried internally; semantic ones never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Retrieval(_) | EngineError::ServiceUnavailable(_)
        )
    }

    pub fn generation(stage: Stage, detail: impl Into<String>) -> Self {
        EngineError::Generation {
            stage,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(EngineError::Validation("x".into()).status(), 400);
        assert_eq!(EngineError::NotFound("x".into()).status(), 404);
        assert_eq!(EngineError::Retrieval("x".into()).status(), 503);
        assert_eq!(EngineError::ServiceUnavailable("x".into()).status(), 503);
        assert_eq!(
            EngineError::generation(Stage::Writer, "empty").status(),
            500
        );
    }

    #[test]
    fn test_guardrails_message_names_rule() {
        let err = EngineError::GuardrailsRejected {
            direction: Direction::Input,
            violations: vec!["pii: email address detected".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("input guardrails"));
        assert!(msg.contains("pii: email address detected"));
    }
}
