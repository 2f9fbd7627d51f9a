//! TOML configuration.
//!
//! Loaded once by [`load_config`], validated, and then handed to every
//! component constructor. Nothing reads configuration at call time.
//!
//! ```toml
//! [db]
//! path = "./data/research.sqlite"
//!
//! [retrieval]
//! top_k = 5
//! hybrid_alpha = 0.5
//!
//! [embedding]
//! provider = "hashing"
//! dims = 256
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [guardrails]
//! strict_mode = false
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use research_core::guardrails::GuardrailsConfig;
use research_core::pipeline::PipelineConfig;
use research_core::search::{RetrievalParams, MAX_TOP_K};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            timeout_secs: default_retrieval_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k,
            alpha: self.hybrid_alpha,
            candidate_k: self.candidate_k,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_hybrid_alpha() -> f64 {
    0.5
}
fn default_candidate_k() -> usize {
    50
}
fn default_retrieval_timeout_secs() -> u64 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_gen_max_tokens(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_gen_max_tokens() -> u32 {
    1024
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    from_toml_str(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration from TOML text.
pub fn from_toml_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.retrieval;
    if !(1..=MAX_TOP_K).contains(&r.top_k) {
        bail!("retrieval.top_k must be between 1 and {}", MAX_TOP_K);
    }
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if r.candidate_k < r.top_k {
        bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }
    if r.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" => {}
        "hashing" => {
            if e.dims.unwrap_or(0) == 0 {
                bail!("embedding.dims must be > 0 when provider is 'hashing'");
            }
        }
        "openai" | "ollama" => {
            if e.dims.unwrap_or(0) == 0 {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or ollama.",
            other
        ),
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    let g = &config.generation;
    match g.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if g.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    g.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if g.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    if !(0.0..=1.0).contains(&config.pipeline.min_support_overlap) {
        bail!("pipeline.min_support_overlap must be in [0.0, 1.0]");
    }

    let gr = &config.guardrails;
    if gr.max_query_chars == 0 {
        bail!("guardrails.max_query_chars must be > 0");
    }
    if !(0.0..=1.0).contains(&gr.citation_target) {
        bail!("guardrails.citation_target must be in [0.0, 1.0]");
    }
    if gr.min_answer_chars > gr.max_answer_chars {
        bail!("guardrails.min_answer_chars must be <= guardrails.max_answer_chars");
    }

    Ok(())
}
