//! Bounded retries with linear backoff
//!
//! The delay after failed attempt `n` is `n × step`. The remote service is
//! known to tolerate this curve; it is not exponential.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Hard ceiling on attempts per remote call
pub const MAX_RETRIES_CEILING: u32 = 10;

/// Attempts per remote call unless configured otherwise
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default backoff step
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_STEP)
    }
}

impl RetryPolicy {
    /// `max_retries` is clamped to `1..=MAX_RETRIES_CEILING`
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries: max_retries.clamp(1, MAX_RETRIES_CEILING),
            backoff_step,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Attempts for one call, honouring a per-call override
    pub fn attempts(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.max_retries)
            .clamp(1, MAX_RETRIES_CEILING)
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out
    ///
    /// Cancellation is observed before each attempt and during backoff; an
    /// attempt already in flight runs to completion.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        requested: Option<u32>,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts(requested);
        let mut errors = Vec::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            debug!(operation, attempt, attempts, "remote attempt");

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(operation, attempt, attempts, error = %e, "remote attempt failed");
                    errors.push(e.to_string());
                    if attempt < attempts {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                            _ = tokio::time::sleep(self.delay_after(attempt)) => {}
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::NoResponse {
            operation: operation.to_string(),
            attempts,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(10, Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(5, Duration::from_millis(200));
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_attempts_are_clamped() {
        let policy = RetryPolicy::new(50, Duration::ZERO);
        assert_eq!(policy.max_retries(), MAX_RETRIES_CEILING);
        assert_eq!(policy.attempts(None), MAX_RETRIES_CEILING);
        assert_eq!(policy.attempts(Some(3)), 3);
        assert_eq!(policy.attempts(Some(0)), 1);
        assert_eq!(policy.attempts(Some(99)), MAX_RETRIES_CEILING);
    }

    #[tokio::test]
    async fn test_exact_attempt_count_then_aggregated_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = fast()
            .run("getSeed", Some(3), &CancellationToken::new(), |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(ClientError::Transport(format!("refused #{}", attempt))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ClientError::NoResponse { attempts, errors, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(errors.len(), 3);
                assert!(errors[2].contains("refused #3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fault_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = fast()
            .run("getEstUp", None, &CancellationToken::new(), |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ClientError::SoapFault {
                        code: "soapenv:Server".into(),
                        message: "boom".into(),
                    })
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ClientError::SoapFault { .. })));
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let result = fast()
            .run("getSeed", None, &CancellationToken::new(), |attempt| async move {
                if attempt < 3 {
                    Err(ClientError::Transport("reset".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_between_attempts() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let policy = RetryPolicy::new(10, Duration::from_secs(30));
        let result: Result<()> = policy
            .run("getSeed", None, &cancel, |_| {
                trigger.cancel();
                async { Err(ClientError::Transport("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = fast().run("getSeed", None, &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
