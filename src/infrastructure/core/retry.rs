use crate::domain::errors::StorageError;
use crate::infrastructure::observability::Metrics;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for store calls.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    metrics: Option<Metrics>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            metrics: None,
        }
    }

    /// Single attempt, no waiting. Useful in tests.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `f` until it succeeds or the attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(StorageError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        reason: format!("{:#}", e),
                    });
                }
                Err(e) => {
                    warn!(
                        "RetryPolicy: {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation, attempt, self.max_attempts, e, backoff
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_storage_retries(operation);
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .finish()
    }
}
