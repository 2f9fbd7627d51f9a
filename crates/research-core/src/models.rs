//! Core data models shared by ingestion, retrieval, the agent pipeline and
//! the evaluation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bibliographic metadata attached to a source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

/// A source document submitted for ingestion. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source identifier (path, URL, DOI, ...). Unique per store.
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A bounded contiguous slice of a document: the unit of retrieval.
///
/// `id` is a deterministic hash of source, normalized text and position,
/// so re-ingesting identical text always yields identical ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub position: i64,
    pub text: String,
}

/// One ranked chunk for one query. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Normalized keyword relevance in `[0, 1]`.
    pub keyword_score: f64,
    /// Normalized vector similarity in `[0, 1]`.
    pub vector_score: f64,
    /// `alpha * vector_score + (1 - alpha) * keyword_score`.
    pub fused_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

/// Answer language accepted at the query boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    De,
    Fr,
    Es,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::De => "de",
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }

    /// English name used inside generation prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::De => "German",
            Language::Fr => "French",
            Language::Es => "Spanish",
        }
    }

    /// Caveat that opens every fallback-mode answer.
    pub fn fallback_caveat(self) -> &'static str {
        match self {
            Language::En => {
                "Note: No sourced answer is available. The indexed documents contain no passages relevant to this question, so the following is general background without citations."
            }
            Language::De => {
                "Hinweis: Keine belegte Antwort verfügbar. Die indizierten Dokumente enthalten keine relevanten Passagen zu dieser Frage; das Folgende ist allgemeines Hintergrundwissen ohne Quellenangaben."
            }
            Language::Fr => {
                "Remarque : Aucune réponse sourcée n'est disponible. Les documents indexés ne contiennent aucun passage pertinent pour cette question ; ce qui suit est une information générale sans citations."
            }
            Language::Es => {
                "Nota: No hay una respuesta con fuentes disponible. Los documentos indexados no contienen pasajes relevantes para esta pregunta; lo siguiente es información general sin citas."
            }
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "de" => Ok(Language::De),
            "fr" => Ok(Language::Fr),
            "es" => Ok(Language::Es),
            other => Err(format!(
                "unsupported language '{}'; expected one of en, de, fr, es",
                other
            )),
        }
    }
}

/// Pipeline operating mode, fixed before the first stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Context is available; answers must be grounded and cited.
    Strict,
    /// No context; the answer carries a caveat and no citations.
    Fallback,
}

/// Metric scores computed for one (query, context, answer) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub citation_coverage: f64,
    pub groundedness: f64,
    pub answer_relevance: f64,
    pub context_relevance: f64,
}

/// A persisted, fingerprint-keyed evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub record_id: String,
    pub fingerprint: String,
    pub scores: EvaluationScores,
    pub created_at: DateTime<Utc>,
}

impl EvaluationRecord {
    /// Whether the record is older than `ttl_secs` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() >= ttl_secs as i64
    }
}
