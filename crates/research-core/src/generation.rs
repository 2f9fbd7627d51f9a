//! Text-generation service trait.
//!
//! Large-language-model inference is consumed as a black box:
//! `generate(prompt) -> text`. Timeouts and transport retries belong to the
//! caller that owns the concrete client; implementations report exhausted
//! transient failures as [`EngineError::ServiceUnavailable`](crate::EngineError::ServiceUnavailable).

use async_trait::async_trait;

use crate::error::EngineResult;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Model or backend identifier, for logs.
    fn name(&self) -> &str;

    /// Produce a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> EngineResult<String>;
}
