//! Policy composition over plain callables.
//!
//! Tower layers already compose policies around a `Service`. This module
//! gives the same nesting to a bare operation: an [`Operation`] is a
//! reusable zero-argument async callable, and every policy knows how to
//! wrap one into another [`Operation`]. Wrapping is ordinary function
//! composition, so any depth and order works, and because `Fault` is the
//! error type at every level, an inner layer's fault kind reaches the
//! outermost predicate unchanged.
//!
//! ```rust,no_run
//! use breakwater::{Operation, RetryConfig, RetryPolicy, TimeoutConfig, TimeoutPolicy};
//!
//! # async fn example() -> breakwater::Result<String> {
//! let op = Operation::new(|| async { Ok("payload".to_string()) });
//! let timeout = TimeoutPolicy::new(TimeoutConfig::default());
//! let retry = RetryPolicy::new(RetryConfig::default());
//!
//! // Retry wraps timeout wraps the raw call.
//! let mut guarded = retry.wrap(timeout.wrap(op));
//! guarded.invoke().await
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::breaker::CircuitBreaker;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;

/// Boxed future produced by one invocation of an [`Operation`].
pub type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A reusable zero-argument async callable producing `T` or a [`Fault`].
///
/// Each call to [`invoke`](Operation::invoke) starts a fresh attempt,
/// which is what lets a retry policy re-run the layers beneath it.
///
/// [`Fault`]: crate::error::Fault
pub struct Operation<T> {
    f: Box<dyn FnMut() -> OperationFuture<T> + Send>,
}

impl<T> Operation<T> {
    pub fn new<F, Fut>(mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            f: Box::new(move || Box::pin(f())),
        }
    }

    pub async fn invoke(&mut self) -> Result<T> {
        (self.f)().await
    }

    // Policies hold the wrapped operation behind a lock so the operation
    // stays reusable while each produced future is self-contained.
    fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

impl TimeoutPolicy {
    /// Bound every invocation of `op` by this policy's limit.
    pub fn wrap<T: Send + 'static>(&self, op: Operation<T>) -> Operation<T> {
        let policy = self.clone();
        let op = op.into_shared();
        Operation::new(move || {
            let policy = policy.clone();
            let op = Arc::clone(&op);
            async move {
                policy
                    .execute(async move { op.lock().await.invoke().await })
                    .await
            }
        })
    }
}

impl RetryPolicy {
    /// Re-invoke `op` on retryable faults per this policy.
    pub fn wrap<T: Send + 'static>(&self, op: Operation<T>) -> Operation<T> {
        let policy = self.clone();
        let op = op.into_shared();
        Operation::new(move || {
            let policy = policy.clone();
            let op = Arc::clone(&op);
            async move {
                policy
                    .execute(|| {
                        let op = Arc::clone(&op);
                        async move { op.lock().await.invoke().await }
                    })
                    .await
            }
        })
    }
}

impl CircuitBreaker {
    /// Route every invocation of `op` through this breaker.
    pub fn wrap<T: Send + 'static>(&self, op: Operation<T>) -> Operation<T> {
        let breaker = self.clone();
        let op = op.into_shared();
        Operation::new(move || {
            let breaker = breaker.clone();
            let op = Arc::clone(&op);
            async move {
                breaker
                    .execute(|| async move { op.lock().await.invoke().await })
                    .await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::error::{Fault, FaultKind};
    use crate::retry::RetryConfig;
    use crate::timeout::TimeoutConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn operation_is_reusable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut op = Operation::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        });

        assert_eq!(op.invoke().await.unwrap(), 0);
        assert_eq!(op.invoke().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_around_timeout_reinvokes_the_whole_inner_stack() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let op = Operation::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        });

        let timeout = TimeoutPolicy::new(TimeoutConfig {
            limit: Duration::from_secs(1),
        });
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        });

        let mut guarded = retry.wrap(timeout.wrap(op));
        let fault = guarded.invoke().await.unwrap_err();

        assert_eq!(fault.kind, FaultKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fault_kind_survives_every_layer_boundary() {
        let op = Operation::new(|| async {
            Err::<(), _>(Fault::permanent("table does not exist"))
        });

        let timeout = TimeoutPolicy::new(TimeoutConfig::default());
        let retry = RetryPolicy::new(RetryConfig::default());
        let breaker = CircuitBreaker::new("db", BreakerConfig::default());

        let mut guarded = retry.wrap(timeout.wrap(breaker.wrap(op)));
        let fault = guarded.invoke().await.unwrap_err();

        assert_eq!(fault.kind, FaultKind::Permanent);
        assert_eq!(fault.cause, "table does not exist");
    }

    #[tokio::test]
    async fn broken_circuit_from_inner_layer_stops_outer_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let op = Operation::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Fault::transient("boom")) }
        });

        let breaker = CircuitBreaker::new(
            "db",
            BreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_secs(60),
            },
        );
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        });

        let mut guarded = retry.wrap(breaker.wrap(op));

        // First invocation trips the breaker; no retry budget is spent on
        // the rejection that follows.
        let fault = guarded.invoke().await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::BrokenCircuit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
