//! Query-time retrieval with a timeout and one retry.
//!
//! Wraps [`hybrid_search`] for the engine:
//!
//! - the query is embedded when an embedder is configured; an embedding
//!   failure degrades to keyword-only ranking instead of failing the query
//! - each search attempt is bounded by `retrieval.timeout_secs`
//! - an unreachable index is retried once after `retrieval.retry_backoff_ms`
//! - a timeout surfaces as `ServiceUnavailable`

use std::sync::Arc;
use std::time::Duration;

use research_core::embedding::Embedder;
use research_core::models::RetrievalResult;
use research_core::search::{hybrid_search, RetrievalParams};
use research_core::store::Store;
use research_core::{EngineError, EngineResult};

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;

const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    params: RetrievalParams,
    timeout: Duration,
    backoff: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            params: config.params(),
            timeout: Duration::from_secs(config.timeout_secs),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Ranked results for `query`, at most `top_k` (configured default when
    /// `None`). Empty when the index holds nothing.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> EngineResult<Vec<RetrievalResult>> {
        let params = match top_k {
            Some(k) => self.params.with_top_k(k),
            None => self.params.clone(),
        };
        params.validate()?;

        let query_vec = self.query_vector(query).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let search = hybrid_search(self.store.as_ref(), query, query_vec.as_deref(), &params);
            let err = match tokio::time::timeout(self.timeout, search).await {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(e)) => e,
                Err(_) => EngineError::ServiceUnavailable(format!(
                    "retrieval did not complete within {}s",
                    self.timeout.as_secs_f64()
                )),
            };

            if !err.is_transient() || attempt >= MAX_ATTEMPTS {
                return Err(err);
            }
            tracing::warn!(attempt, error = %err, "retrieval failed, retrying");
            tokio::time::sleep(self.backoff).await;
        }
    }

    async fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embed_query(embedder.as_ref(), query).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; ranking by keywords only");
                None
            }
        }
    }
}
