//! Failure counting for one external dependency.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use super::error::DependencyError;

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures inside `window` that open the circuit.
    pub failure_threshold: u32,
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub window: Duration,
    pub threshold: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Closed/open breaker. An open circuit closes lazily on the first check made
/// more than `window` after the last failure.
///
/// Outcomes are recorded by the dependency's request queue only.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                window: config.window,
            },
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Gate for a call attempt. Fails with [`DependencyError::Unavailable`]
    /// while the circuit is open.
    pub fn check(&self) -> Result<(), DependencyError> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if elapsed > self.config.window {
            info!("Circuit for {} closed after {:?} quiet", self.name, elapsed);
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            return Ok(());
        }

        Err(DependencyError::Unavailable {
            dependency: self.name.clone(),
            retry_after: self.config.window - elapsed,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(previous) = inner.last_failure_at {
            if now.saturating_duration_since(previous) > self.config.window {
                inner.failure_count = 0;
            }
        }
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);

        if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            warn!(
                "Circuit for {} opened after {} failures",
                self.name, inner.failure_count
            );
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            window: self.config.window,
            threshold: self.config.failure_threshold,
        }
    }
}
