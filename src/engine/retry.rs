//! Bounded retry for collaborator calls.
//!
//! Transient failures are retried with exponential backoff until the policy's
//! time budget runs out. Permanent failures return immediately.

use crate::gateway::GatewayError;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total time budget across all attempts.
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, max_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_interval: max_interval.max(initial_interval),
            max_elapsed,
        }
    }

    /// Tiny intervals for tests.
    pub fn immediate(max_elapsed: Duration) -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(5), max_elapsed)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0u32;
        let result = retry_notify(
            self.backoff(),
            || {
                attempts += 1;
                let fut = op();
                async move {
                    fut.await.map_err(|e| {
                        if e.is_transient() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |err: GatewayError, wait: Duration| {
                warn!(
                    operation,
                    error = %err,
                    retry_in_ms = wait.as_millis() as u64,
                    "Transient failure, retrying"
                );
            },
        )
        .await;

        result.map_err(|error| {
            if error.is_transient() {
                RetryError::Exhausted { attempts, error }
            } else {
                RetryError::Permanent(error)
            }
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_secs(10),
            Duration::from_secs(120),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The call kept failing transiently until the budget ran out.
    Exhausted { attempts: u32, error: GatewayError },
    Permanent(GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = RetryPolicy::immediate(Duration::from_secs(5));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = policy
            .run("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(GatewayError::Network("reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::immediate(Duration::from_secs(5));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = policy
            .run("refused", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Rejected("bad iou".into()))
                }
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Permanent(GatewayError::Rejected("bad iou".into())))
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_on_persistent_transient_error() {
        let policy = RetryPolicy::immediate(Duration::from_millis(30));
        let result: Result<(), _> = policy
            .run("down", || async { Err(GatewayError::RateLimited) })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, error }) => {
                assert!(attempts >= 2);
                assert_eq!(error, GatewayError::RateLimited);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }
}
