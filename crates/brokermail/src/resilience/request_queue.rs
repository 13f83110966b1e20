//! Serialized, spaced dispatch of calls to one dependency.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::circuit_breaker::CircuitBreaker;
use super::error::DependencyError;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What the drain loop hands a task when its turn comes.
enum Dispatch {
    Run(Arc<CircuitBreaker>),
    ShortCircuit(DependencyError),
}

/// One queued call.
struct QueueTask {
    created_at: Instant,
    run: Box<dyn FnOnce(Dispatch) -> BoxFuture + Send>,
}

/// FIFO queue with at most one call in flight and `min_delay` between the end
/// of one call and the start of the next.
///
/// Must be created inside a tokio runtime; the drain task stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct RequestQueue {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<QueueTask>,
    breaker: Arc<CircuitBreaker>,
}

impl RequestQueue {
    pub fn new(breaker: Arc<CircuitBreaker>, min_delay: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name: Arc<str> = Arc::from(breaker.name());
        tokio::spawn(drain(receiver, Arc::clone(&breaker), min_delay));
        Self {
            name,
            sender,
            breaker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Enqueues `operation` and resolves with its outcome, or with
    /// [`DependencyError::Unavailable`] if the circuit was open at its turn.
    pub async fn add<T, F, Fut>(&self, operation: F) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DependencyError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = QueueTask {
            created_at: Instant::now(),
            run: Box::new(move |dispatch| {
                Box::pin(async move {
                    let outcome = match dispatch {
                        Dispatch::ShortCircuit(err) => Err(err),
                        Dispatch::Run(breaker) => {
                            let outcome = operation().await;
                            match &outcome {
                                Ok(_) => breaker.record_success(),
                                Err(_) => breaker.record_failure(),
                            }
                            outcome
                        }
                    };
                    // The caller may have stopped waiting.
                    let _ = tx.send(outcome);
                })
            }),
        };

        self.sender
            .send(task)
            .map_err(|_| DependencyError::QueueClosed(self.name.to_string()))?;
        rx.await
            .map_err(|_| DependencyError::QueueClosed(self.name.to_string()))?
    }
}

async fn drain(
    mut receiver: mpsc::UnboundedReceiver<QueueTask>,
    breaker: Arc<CircuitBreaker>,
    min_delay: Duration,
) {
    let mut last_finished: Option<Instant> = None;

    while let Some(task) = receiver.recv().await {
        let dispatch = match breaker.check() {
            Ok(()) => {
                if let Some(finished) = last_finished {
                    let since = finished.elapsed();
                    if since < min_delay {
                        tokio::time::sleep(min_delay - since).await;
                    }
                }
                Dispatch::Run(Arc::clone(&breaker))
            }
            Err(err) => {
                debug!(dependency = breaker.name(), "Circuit open, short-circuiting queued call");
                Dispatch::ShortCircuit(err)
            }
        };

        let ran = matches!(dispatch, Dispatch::Run(_));
        trace!(
            dependency = breaker.name(),
            waited_ms = task.created_at.elapsed().as_millis() as u64,
            "Dispatching queued call"
        );
        (task.run)(dispatch).await;

        if ran {
            last_finished = Some(Instant::now());
        }
    }

    debug!(dependency = breaker.name(), "Request queue drained and closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn queue(threshold: u32, min_delay_ms: u64) -> RequestQueue {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                window: Duration::from_secs(60),
            },
        ));
        RequestQueue::new(breaker, Duration::from_millis(min_delay_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let queue = queue(3, 10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |n: u32| {
            let order = Arc::clone(&order);
            queue.add(move || async move {
                order.lock().unwrap().push(n);
                Ok(n)
            })
        };

        let (a, b, c) = tokio::join!(push(1), push(2), push(3));
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_measured_from_end_of_previous_call() {
        let queue = queue(3, 1000);
        let spans = Arc::new(Mutex::new(Vec::new()));

        let call = |busy_ms: u64| {
            let spans = Arc::clone(&spans);
            queue.add(move || async move {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(busy_ms)).await;
                spans.lock().unwrap().push((start, Instant::now()));
                Ok(())
            })
        };

        let (a, b) = tokio::join!(call(500), call(10));
        a.unwrap();
        b.unwrap();

        let spans = spans.lock().unwrap();
        let (_, first_end) = spans[0];
        let (second_start, _) = spans[1];
        assert!(second_start.duration_since(first_end) >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_without_delay() {
        let queue = queue(1, 1000);
        let second_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&second_ran);
        let start = Instant::now();

        let first = queue.add(|| async { Err::<(), _>(DependencyError::Network("down".into())) });
        let second = queue.add(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Err(DependencyError::Network(_))));
        assert!(matches!(second, Err(DependencyError::Unavailable { .. })));
        assert!(!second_ran.load(Ordering::SeqCst));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_recorded_before_caller_resumes() {
        let queue = queue(3, 0);

        let _ = queue
            .add(|| async { Err::<(), _>(DependencyError::Timeout("slow".into())) })
            .await;
        assert_eq!(queue.breaker().snapshot().failure_count, 1);

        queue.add(|| async { Ok(()) }).await.unwrap();
        assert_eq!(queue.breaker().snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_call_in_flight() {
        let queue = queue(3, 0);
        let in_flight = Arc::new(AtomicBool::new(false));

        let call = || {
            let in_flight = Arc::clone(&in_flight);
            queue.add(move || async move {
                assert!(!in_flight.swap(true, Ordering::SeqCst));
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.store(false, Ordering::SeqCst);
                Ok(())
            })
        };

        let (a, b, c) = tokio::join!(call(), call(), call());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
    }
}
