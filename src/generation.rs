//! Text-generation providers.
//!
//! | `provider` | Implementation |
//! |------------|----------------|
//! | `disabled` | [`DisabledGenerator`], always `ServiceUnavailable` |
//! | `openai`   | [`OpenAiGenerator`], `POST /v1/chat/completions` |
//! | `ollama`   | [`OllamaGenerator`], `POST /api/generate` |
//!
//! `generation.timeout_secs` bounds each HTTP attempt. [`create_generator`]
//! wraps the provider in a [`TimedGenerator`] whose bound covers all
//! `generation.max_retries` retries and their backoff, so a timeout surfaces
//! as `ServiceUnavailable` only once the retry budget is spent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use research_core::generation::Generator;
use research_core::{EngineError, EngineResult};

use crate::config::GenerationConfig;
use crate::http::{build_client, post_json_with_retry, retry_budget};

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let inner: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledGenerator),
        "openai" => Arc::new(OpenAiGenerator::new(config)?),
        "ollama" => Arc::new(OllamaGenerator::new(config)?),
        other => bail!("Unknown generation provider: {}", other),
    };
    Ok(Arc::new(TimedGenerator::new(inner, call_timeout(config))))
}

/// Outer bound for one stage call.
fn call_timeout(config: &GenerationConfig) -> Duration {
    retry_budget(Duration::from_secs(config.timeout_secs), config.max_retries)
}

/// Applies a per-call timeout to another generator.
pub struct TimedGenerator {
    inner: Arc<dyn Generator>,
    timeout: Duration,
}

impl TimedGenerator {
    pub fn new(inner: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Generator for TimedGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str) -> EngineResult<String> {
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ServiceUnavailable(format!(
                "{} did not respond within {}s",
                self.inner.name(),
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> EngineResult<String> {
        Err(EngineError::ServiceUnavailable(
            "generation provider is disabled; set [generation] provider in the config".to_string(),
        ))
    }
}

// ============ OpenAI ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiGenerator {
    /// Reads `OPENAI_API_KEY` once, here.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> EngineResult<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let body = serde_json::to_value(&request).map_err(|e| EngineError::Internal(e.into()))?;
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI chat",
        )
        .await
        .map_err(|f| f.into_engine_error())?;

        let parsed: ChatResponse = serde_json::from_value(json)
            .map_err(|e| EngineError::Internal(anyhow!("failed to parse OpenAI response: {}", e)))?;
        Ok(parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .unwrap_or_default())
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> EngineResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama generate",
        )
        .await
        .map_err(|f| f.into_engine_error())?;

        let parsed: OllamaResponse = serde_json::from_value(json)
            .map_err(|e| EngineError::Internal(anyhow!("failed to parse Ollama response: {}", e)))?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _prompt: &str) -> EngineResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_service_unavailable() {
        let g = TimedGenerator::new(Arc::new(Slow), Duration::from_millis(20));
        let err = g.generate("p").await.unwrap_err();
        assert!(matches!(err, EngineError::ServiceUnavailable(_)));
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn test_stage_timeout_exceeds_per_attempt_timeout_when_retrying() {
        let config = GenerationConfig {
            timeout_secs: 30,
            max_retries: 2,
            ..GenerationConfig::default()
        };
        assert_eq!(call_timeout(&config), Duration::from_secs(93));

        let no_retries = GenerationConfig {
            max_retries: 0,
            ..config
        };
        assert_eq!(call_timeout(&no_retries), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_disabled_generator_is_unavailable() {
        let g = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(g.name(), "disabled");
        assert!(g.generate("p").await.unwrap_err().is_transient());
    }

    #[test]
    fn test_chat_request_shape() {
        let req = ChatRequest {
            model: "m",
            temperature: 0.5,
            max_tokens: 10,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["messages"][0]["content"], "hi");
        assert_eq!(v["max_tokens"], 10);
    }
}
