//! Embedding providers.
//!
//! | `provider` | Implementation |
//! |------------|----------------|
//! | `disabled` | none; retrieval runs keyword-only |
//! | `hashing`  | [`HashingEmbedder`], offline and deterministic |
//! | `openai`   | [`OpenAiEmbedder`], `POST /v1/embeddings` |
//! | `ollama`   | [`OllamaEmbedder`], `POST /api/embed` |
//!
//! HTTP providers retry through [`crate::http::post_json_with_retry`] and
//! report exhausted retries as `ServiceUnavailable`.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use research_core::embedding::{Embedder, HashingEmbedder};
use research_core::{EngineError, EngineResult};

use crate::config::EmbeddingConfig;
use crate::http::{build_client, post_json_with_retry};

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hashing" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow!("embedding.dims required for hashing provider"))?;
            Ok(Some(Arc::new(HashingEmbedder::new(dims))))
        }
        "openai" => Ok(Some(Arc::new(OpenAiEmbedder::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed `texts` in batches of `batch_size`, preserving order.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> EngineResult<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EngineError::Internal(anyhow!(
                "{} returned {} embeddings for {} inputs",
                embedder.model_name(),
                vectors.len(),
                batch.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> EngineResult<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Internal(anyhow!("Empty embedding response")))
}

fn check_dims(vectors: &[Vec<f32>], dims: usize, model: &str) -> EngineResult<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EngineError::Internal(anyhow!(
            "{} returned a {}-dimensional vector, configured dims = {}",
            model,
            bad.len(),
            dims
        )));
    }
    Ok(())
}

fn parse_float_array(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Reads `OPENAI_API_KEY` once, here.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model,
            dims,
            url,
            max_retries: config.max_retries,
        })
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (i, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(parse_float_array)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .unwrap_or(i as u64);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI embeddings",
        )
        .await
        .map_err(|f| f.into_engine_error())?;
        let vectors = parse_openai_response(&json)?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model,
            dims,
            url,
            max_retries: config.max_retries,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            parse_float_array(e)
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama embeddings",
        )
        .await
        .map_err(|f| f.into_engine_error())?;
        let vectors = parse_ollama_response(&json)?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_and_hashing() {
        let mut cfg = EmbeddingConfig::default();
        assert!(create_embedder(&cfg).unwrap().is_none());

        cfg.provider = "hashing".to_string();
        cfg.dims = Some(32);
        let e = create_embedder(&cfg).unwrap().unwrap();
        assert_eq!(e.dims(), 32);
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_batched_preserves_order() {
        let e = HashingEmbedder::new(16);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let batched = embed_batched(&e, &texts, 2).await.unwrap();
        let single = e.embed(&texts).await.unwrap();
        assert_eq!(batched, single);
    }
}
