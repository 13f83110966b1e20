//! Protection for unreliable outbound calls.
//!
//! Every external dependency gets its own [`CircuitBreaker`] and
//! [`RequestQueue`]; callers add [`RetryPolicy`] on top, usually through a
//! [`GuardedDependency`]. Nothing here is global, so two dependencies never
//! share failure counts or spacing.

pub mod circuit_breaker;
pub mod error;
pub mod guard;
pub mod request_queue;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use error::DependencyError;
pub use guard::GuardedDependency;
pub use request_queue::RequestQueue;
pub use retry::{
    cancellable_sleep, execute_with_retry, RetryAttempt, RetryError, RetryOptions, RetryPolicy,
    Retryable,
};
