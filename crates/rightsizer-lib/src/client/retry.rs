//! Retry with exponential backoff and full jitter

use super::ApiResult;
use crate::error::{OptimizerError, Result};
use crate::observability::PipelineMetrics;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Draw each delay uniformly from [0, computed]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Runs external calls under the retry policy
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `call`, retrying throttling and transient failures.
    ///
    /// Fatal errors return immediately as `OptimizerError::Api`. Running out
    /// of attempts on a retryable error returns `OptimizerError::TransientApi`.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    return Err(OptimizerError::Api {
                        operation: operation.to_string(),
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(OptimizerError::TransientApi {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.compute_backoff(attempt - 1);
                    PipelineMetrics::new().inc_api_retries(operation);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// `initial * multiplier^retry`, capped, then optionally jittered
    pub fn compute_backoff(&self, retry: u32) -> Duration {
        let capped = self.capped_backoff(retry);
        if self.config.jitter && capped > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=capped))
        } else {
            Duration::from_millis(capped)
        }
    }

    fn capped_backoff(&self, retry: u32) -> u64 {
        let base = self.config.initial_backoff_ms as f64;
        let computed = base * self.config.backoff_multiplier.powi(retry as i32);
        computed.min(self.config.max_backoff_ms as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_growth_without_jitter() {
        let executor = RetryExecutor::new(RetryConfig {
            jitter: false,
            ..Default::default()
        });
        assert_eq!(executor.compute_backoff(0), Duration::from_secs(1));
        assert_eq!(executor.compute_backoff(1), Duration::from_secs(2));
        assert_eq!(executor.compute_backoff(2), Duration::from_secs(4));
        assert_eq!(executor.compute_backoff(4), Duration::from_secs(16));
        assert_eq!(executor.compute_backoff(5), Duration::from_secs(30));
        assert_eq!(executor.compute_backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn test_full_jitter_stays_in_bounds() {
        let executor = RetryExecutor::default();
        for retry in 0..8 {
            let cap = executor.capped_backoff(retry);
            for _ in 0..50 {
                assert!(executor.compute_backoff(retry).as_millis() as u64 <= cap);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::default();

        let counter = calls.clone();
        let result = executor
            .execute("config_store.get", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ApiError::Throttled("Rate exceeded".into()))
                    } else {
                        Ok("value")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::default();

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute("provisioner.create", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Transient("connection reset".into()))
                }
            })
            .await;

        match result {
            Err(OptimizerError::TransientApi {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "provisioner.create");
                assert_eq!(attempts, 5);
            }
            other => panic!("expected TransientApi, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::default();

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute("config_store.put", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Unauthorized("AccessDenied".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(OptimizerError::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
