//! Bounded exponential backoff with a cancellable wait between attempts.
//!
//! The delay before retry `n` (1-based attempt that just failed) is
//! `min(base_delay * backoff_factor^(n-1), max_delay)`.
//!
//! ```ignore
//! let options = RetryOptions::new(RetryPolicy::default()).with_cancellation(token);
//! let quote = execute_with_retry(|_attempt| client.fetch_quote("VTI"), &options).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::DependencyError;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DependencyError {
    fn is_retryable(&self) -> bool {
        DependencyError::is_retryable(self)
    }
}

/// Passed to the retry callback before each backoff sleep.
#[derive(Debug)]
pub struct RetryAttempt<'e, E> {
    /// The attempt that just failed (1-based).
    pub attempt_number: u32,
    pub last_error: &'e E,
    pub next_delay: Duration,
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancelled while waiting; no further attempts were made.
    Aborted { attempts: u32 },
    /// The last error returned by the operation, unchanged.
    Operation(E),
}

impl<E> RetryError<E> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted { .. })
    }

    /// The underlying operation error, if there was one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(e) => Some(e),
            RetryError::Aborted { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Aborted { attempts } => {
                write!(f, "Retry aborted after {} attempt(s)", attempts)
            }
            RetryError::Operation(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Aborted { .. } => None,
            RetryError::Operation(e) => e.source(),
        }
    }
}

/// Marker returned when a [`cancellable_sleep`] is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn cancellable_sleep(delay: Duration, cancel: &CancellationToken) -> Result<(), Aborted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Aborted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

type Condition<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type RetryHook<'a, E> = Box<dyn Fn(&RetryAttempt<'_, E>) + Send + Sync + 'a>;
type ExhaustedHook<'a, E> = Box<dyn Fn(u32, &E) + Send + Sync + 'a>;

/// Policy plus the hooks and cancellation handle for one retried call.
pub struct RetryOptions<'a, E> {
    policy: RetryPolicy,
    retry_condition: Condition<'a, E>,
    on_retry_attempt: Option<RetryHook<'a, E>>,
    on_max_attempts_reached: Option<ExhaustedHook<'a, E>>,
    cancel: CancellationToken,
}

impl<'a, E: Retryable> RetryOptions<'a, E> {
    /// Options using the error's own retry classification.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_condition(policy, |e: &E| e.is_retryable())
    }
}

impl<'a, E> RetryOptions<'a, E> {
    pub fn with_condition<C>(policy: RetryPolicy, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'a,
    {
        Self {
            policy,
            retry_condition: Box::new(condition),
            on_retry_attempt: None,
            on_max_attempts_reached: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn on_retry_attempt<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryAttempt<'_, E>) + Send + Sync + 'a,
    {
        self.on_retry_attempt = Some(Box::new(hook));
        self
    }

    pub fn on_max_attempts_reached<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &E) + Send + Sync + 'a,
    {
        self.on_max_attempts_reached = Some(Box::new(hook));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. The operation receives the 1-based attempt number.
pub async fn execute_with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<'_, E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = options.policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if options.cancel.is_cancelled() {
            return Err(RetryError::Aborted { attempts: attempt });
        }

        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !(options.retry_condition)(&error) {
            return Err(RetryError::Operation(error));
        }

        if attempt >= max_attempts {
            if let Some(hook) = &options.on_max_attempts_reached {
                hook(attempt, &error);
            }
            return Err(RetryError::Operation(error));
        }

        let delay = options.policy.delay_for_attempt(attempt);
        if let Some(hook) = &options.on_retry_attempt {
            hook(&RetryAttempt {
                attempt_number: attempt,
                last_error: &error,
                next_delay: delay,
            });
        }

        if cancellable_sleep(delay, &options.cancel).await.is_err() {
            return Err(RetryError::Aborted { attempts: attempt });
        }
    }
}
