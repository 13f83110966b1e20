//! Per-dependency bundle of request queue, circuit breaker and retry policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use super::error::DependencyError;
use super::request_queue::RequestQueue;
use super::retry::{execute_with_retry, RetryAttempt, RetryError, RetryOptions, RetryPolicy};

/// Everything needed to call one unreliable dependency.
///
/// Each retry attempt goes through the queue on its own, so a backoff sleep
/// never holds the queue for other callers.
#[derive(Clone)]
pub struct GuardedDependency {
    queue: RequestQueue,
    policy: RetryPolicy,
}

impl GuardedDependency {
    pub fn new(
        name: &str,
        breaker: CircuitBreakerConfig,
        min_delay: Duration,
        policy: RetryPolicy,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(name, breaker));
        Self {
            queue: RequestQueue::new(breaker, min_delay),
            policy,
        }
    }

    /// Wraps an existing queue, e.g. one shared with another caller.
    pub fn with_queue(queue: RequestQueue, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.queue.breaker().snapshot()
    }

    /// Calls the dependency with queueing, breaker and retry applied.
    ///
    /// `make_call` builds a fresh future per attempt. Cancelling `cancel`
    /// during a backoff sleep yields [`DependencyError::Aborted`].
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        make_call: F,
    ) -> Result<T, DependencyError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>> + Send + 'static,
        T: Send + 'static,
    {
        let name = self.name().to_string();
        let options = RetryOptions::new(self.policy.clone())
            .with_cancellation(cancel.clone())
            .on_retry_attempt(|attempt: &RetryAttempt<'_, DependencyError>| {
                warn!(
                    dependency = %name,
                    attempt = attempt.attempt_number,
                    delay_ms = attempt.next_delay.as_millis() as u64,
                    "Call failed, retrying: {}",
                    attempt.last_error
                );
            })
            .on_max_attempts_reached(|attempts, last: &DependencyError| {
                error!(dependency = %name, attempts, "Giving up: {}", last);
            });

        let outcome = execute_with_retry(
            |_attempt| {
                let queue = self.queue.clone();
                let call = make_call();
                async move { queue.add(move || call).await }
            },
            &options,
        )
        .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(RetryError::Operation(e)) => Err(e),
            Err(RetryError::Aborted { attempts }) => Err(DependencyError::Aborted {
                dependency: self.name().to_string(),
                attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guarded(threshold: u32) -> GuardedDependency {
        GuardedDependency::new(
            "classifier",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                window: Duration::from_secs(60),
            },
            Duration::from_millis(100),
            RetryPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_through_the_queue() {
        let dep = guarded(10);
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = dep
            .call(&token, || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DependencyError::http(502, "bad gateway"))
                    } else {
                        Ok("expense")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "expense");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dep.breaker_snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_escalate_to_open_circuit() {
        let dep = guarded(3);
        let token = CancellationToken::new();
        let fail = || async { Err::<(), _>(DependencyError::Network("refused".into())) };

        let first = dep.call(&token, fail).await;
        assert!(matches!(first, Err(DependencyError::Network(_))));

        // Three recorded failures opened the circuit; the next call is not attempted.
        let calls = Arc::new(AtomicU32::new(0));
        let second = dep
            .call(&token, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(matches!(second, Err(DependencyError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_maps_to_aborted() {
        let dep = guarded(10);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = dep
            .call(&token, || async {
                Err::<(), _>(DependencyError::Timeout("slow".into()))
            })
            .await;

        assert!(matches!(
            result,
            Err(DependencyError::Aborted { attempts: 1, .. })
        ));
    }
}
