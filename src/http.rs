//! JSON-over-HTTP calls with bounded retry, shared by the embedding and
//! generation providers.
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors and client timeouts → retry
//! - backoff: 1s, 2s, 4s, ... (capped at 2^5)

use std::time::Duration;

use anyhow::anyhow;
use research_core::EngineError;

/// Failure after the retry budget is spent, or a non-retryable one.
#[derive(Debug)]
pub enum HttpFailure {
    Transient(String),
    Fatal(String),
}

impl HttpFailure {
    /// Transient failures become `ServiceUnavailable`, fatal ones `Internal`.
    pub fn into_engine_error(self) -> EngineError {
        match self {
            HttpFailure::Transient(msg) => EngineError::ServiceUnavailable(msg),
            HttpFailure::Fatal(msg) => EngineError::Internal(anyhow!(msg)),
        }
    }
}

pub fn build_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Worst-case wall time of [`post_json_with_retry`]: every attempt runs to
/// the client timeout and every backoff is slept.
pub fn retry_budget(per_attempt: Duration, max_retries: u32) -> Duration {
    (1..=max_retries).fold(per_attempt, |total, attempt| {
        total + backoff(attempt) + per_attempt
    })
}

/// POST `body` to `url` and parse the JSON response.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, HttpFailure> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        HttpFailure::Fatal(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(HttpFailure::Fatal(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    let msg = last_err.unwrap_or_else(|| format!("{} request failed after retries", label));
    tracing::warn!(label, retries = max_retries, "{}", msg);
    Err(HttpFailure::Transient(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(40), Duration::from_secs(32));
    }

    #[test]
    fn test_retry_budget_covers_every_attempt() {
        let per_attempt = Duration::from_secs(10);
        assert_eq!(retry_budget(per_attempt, 0), per_attempt);
        // 10 + (1 + 10) + (2 + 10)
        assert_eq!(retry_budget(per_attempt, 2), Duration::from_secs(33));
    }

    #[test]
    fn test_failure_mapping() {
        assert_eq!(
            HttpFailure::Transient("x".into()).into_engine_error().status(),
            503
        );
        assert_eq!(HttpFailure::Fatal("x".into()).into_engine_error().status(), 500);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let client = build_client(1).unwrap();
        let err = post_json_with_retry(
            &client,
            "http://127.0.0.1:9/unreachable",
            None,
            &serde_json::json!({}),
            0,
            "test",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HttpFailure::Transient(_)));
    }
}
