//! Retry with exponential backoff.
//!
//! [`RetryPolicy::execute`] re-invokes a failed operation up to a bounded
//! number of attempts, waiting an increasing delay between attempts, but
//! only for faults its predicate accepts. [`RetryLayer`] exposes the same
//! behavior as Tower middleware for service stacks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::{Fault, FaultKind, FaultPredicate, Result, TransientOnly};

/// Retry configuration. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total invocation budget, including the first attempt. Must be >= 1;
    /// a value of 1 performs no retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Factor applied to the delay after each failed attempt. Must be >= 1.
    pub backoff_multiplier: f64,
    /// Ceiling on any single delay, so large attempt counts cannot overflow.
    pub max_delay: Duration,
    /// Widen each delay by a random fraction to spread out synchronized
    /// retries. Off by default so delay math stays exact.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after attempt `attempt` (1-indexed) has failed, i.e.
    /// `base_delay * backoff_multiplier^(attempt - 1)` capped at
    /// `max_delay`. Computed in floating point so a deep attempt sequence
    /// saturates at the cap instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let delay = self.base_delay.as_secs_f64() * factor;
        let cap = self.max_delay.as_secs_f64();
        if delay.is_finite() {
            // A multiplier below zero would make the product negative,
            // which Duration cannot represent. Treat it as no delay.
            Duration::from_secs_f64(delay.clamp(0.0, cap))
        } else {
            self.max_delay
        }
    }
}

/// Re-invokes an operation on retryable faults, sleeping between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: Arc<dyn FaultPredicate>,
    clock: Arc<dyn Clock>,
}

impl RetryPolicy {
    /// Policy over `config` with the [`TransientOnly`] predicate and the
    /// real clock.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(TransientOnly),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_predicate(mut self, predicate: impl FaultPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying per the configuration.
    ///
    /// The fault returned after exhaustion is the one from the last
    /// attempt, unchanged. Broken-circuit rejections are terminal
    /// regardless of the predicate.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(fault) => {
                    if fault.kind == FaultKind::BrokenCircuit {
                        debug!(%fault, "circuit rejection is terminal, not retrying");
                        return Err(fault);
                    }
                    if !self.predicate.retryable(&fault) {
                        debug!(%fault, "fault is not retryable");
                        return Err(fault);
                    }
                    if attempt >= self.config.max_attempts {
                        warn!(
                            attempt,
                            max_attempts = self.config.max_attempts,
                            %fault,
                            "retry budget exhausted"
                        );
                        return Err(fault);
                    }

                    let delay = self.next_delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %fault, "attempt failed, retrying");
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn next_delay(&self, failed_attempt: u32) -> Duration {
        let mut delay = self.config.delay_after(failed_attempt);
        if self.config.jitter {
            use rand::Rng;
            let spread = rand::thread_rng().gen_range(0.0..0.25);
            let extra = delay.mul_f64(spread);
            delay = (delay + extra).min(self.config.max_delay);
        }
        delay
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tower layer applying a [`RetryPolicy`] to a service.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(Mutex::new(inner)),
            policy: self.policy.clone(),
        }
    }
}

/// Service produced by [`RetryLayer`].
pub struct Retry<S> {
    inner: Arc<Mutex<S>>,
    policy: RetryPolicy,
}

impl<S, Req> Service<Req> for Retry<S>
where
    Req: Clone + Send + Sync + 'static,
    S: Service<Req, Error = Fault> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = Fault;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<()>> {
        // Readiness of the shared inner service is established per attempt.
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(|| {
                    let inner = inner.clone();
                    let req = req.clone();
                    async move {
                        let mut guard = inner.lock().await;
                        ServiceExt::ready(&mut *guard).await?.call(req).await
                    }
                })
                .await
        })
    }
}
