//! Fingerprint-keyed evaluation records with single-flight computation.
//!
//! [`EvaluationCache::evaluate_or_fetch`] hashes the (query, context,
//! answer) triple, returns the stored record when it is younger than the
//! TTL, and otherwise computes and persists a fresh one. Concurrent calls
//! for one fingerprint serialize on a per-fingerprint lock: the first caller
//! computes, the rest find its record when they acquire the lock. At most
//! one computation runs per fingerprint at any time.
//!
//! The registry of per-fingerprint locks is a plain `std::sync::Mutex`
//! held only long enough to look up or insert an entry, never across an
//! await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use research_core::metrics::{compute_scores, fingerprint};
use research_core::models::EvaluationRecord;
use research_core::pipeline::fact_check::ClaimVerifier;
use research_core::{EngineError, EngineResult};

/// Persistence contract for evaluation records. At most one record per
/// fingerprint; `put` replaces an existing one in place.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EvaluationRecord>>;

    async fn find_by_id(&self, record_id: &str) -> Result<Option<EvaluationRecord>>;

    async fn put(&self, record: &EvaluationRecord) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Records kept in process memory, keyed by fingerprint.
#[derive(Default)]
pub struct InMemoryEvaluationStore {
    records: Mutex<HashMap<String, EvaluationRecord>>,
}

impl InMemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, EvaluationRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl EvaluationStore for InMemoryEvaluationStore {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EvaluationRecord>> {
        Ok(self.records().get(fingerprint).cloned())
    }

    async fn find_by_id(&self, record_id: &str) -> Result<Option<EvaluationRecord>> {
        Ok(self
            .records()
            .values()
            .find(|r| r.record_id == record_id)
            .cloned())
    }

    async fn put(&self, record: &EvaluationRecord) -> Result<()> {
        self.records()
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records().len() as u64)
    }
}

type FlightMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

pub struct EvaluationCache {
    store: Arc<dyn EvaluationStore>,
    verifier: Arc<dyn ClaimVerifier>,
    ttl_secs: u64,
    min_claim_words: usize,
    inflight: Mutex<FlightMap>,
    computations: AtomicU64,
}

impl EvaluationCache {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        verifier: Arc<dyn ClaimVerifier>,
        ttl_secs: u64,
        min_claim_words: usize,
    ) -> Self {
        Self {
            store,
            verifier,
            ttl_secs,
            min_claim_words,
            inflight: Mutex::new(HashMap::new()),
            computations: AtomicU64::new(0),
        }
    }

    /// Number of metric computations performed since construction.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::SeqCst)
    }

    /// Return the cached record for the triple, computing it at most once.
    ///
    /// `context[i]` is the passage cited as `[i + 1]` in `answer`.
    pub async fn evaluate_or_fetch(
        &self,
        query: &str,
        context: &[String],
        answer: &str,
    ) -> EngineResult<EvaluationRecord> {
        let fp = fingerprint(query, context, answer);

        if let Some(record) = self.fresh(&fp).await? {
            tracing::debug!(fingerprint = %fp, record_id = %record.record_id, "evaluation cache hit");
            return Ok(record);
        }

        let flight = self.flight(&fp);
        let _guard = flight.lock.lock().await;
        let record = match self.fresh(&fp).await? {
            Some(record) => record,
            None => self.compute(&fp, query, context, answer).await?,
        };
        Ok(record)
    }

    /// Look up a stored record by id.
    pub async fn get(&self, record_id: &str) -> EngineResult<EvaluationRecord> {
        self.store
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("evaluation record '{}'", record_id)))
    }

    async fn fresh(&self, fp: &str) -> EngineResult<Option<EvaluationRecord>> {
        let record = self.store.find_by_fingerprint(fp).await?;
        Ok(record.filter(|r| !r.is_expired(Utc::now(), self.ttl_secs)))
    }

    async fn compute(
        &self,
        fp: &str,
        query: &str,
        context: &[String],
        answer: &str,
    ) -> EngineResult<EvaluationRecord> {
        self.computations.fetch_add(1, Ordering::SeqCst);
        let scores = compute_scores(
            query,
            context,
            answer,
            self.verifier.as_ref(),
            self.min_claim_words,
        );
        let record = EvaluationRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: fp.to_string(),
            scores,
            created_at: Utc::now(),
        };
        self.store.put(&record).await?;
        tracing::info!(
            record_id = %record.record_id,
            coverage = scores.citation_coverage,
            groundedness = scores.groundedness,
            "evaluation computed"
        );
        Ok(record)
    }

    fn flight(&self, fp: &str) -> Flight<'_> {
        let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        let lock = map.entry(fp.to_string()).or_default().clone();
        Flight {
            map: &self.inflight,
            key: fp.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// A caller's handle on a per-fingerprint lock. Dropping the last handle
/// removes the entry, whether the caller finished, failed or was cancelled.
struct Flight<'a> {
    map: &'a Mutex<FlightMap>,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.key);
        }
    }
}
