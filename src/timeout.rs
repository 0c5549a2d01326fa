//! Wall-clock bound on a single invocation attempt.
//!
//! The policy races the operation against the clock. On expiry the
//! operation's future is dropped, which cancels it in the usual Rust way;
//! nothing keeps running in the background, and the caller gets a
//! `Timeout` fault instead of its result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::debug;

use crate::clock::{Clock, TokioClock};
use crate::error::{Fault, Result};

/// Timeout configuration. Immutable once constructed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on the wall-clock duration of one attempt.
    pub limit: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(30),
        }
    }
}

/// Bounds the duration of a single attempt.
#[derive(Clone)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
    clock: Arc<dyn Clock>,
}

impl TimeoutPolicy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Wait for `operation` at most `limit`; past that, drop it and return
    /// a `Timeout` fault.
    pub async fn execute<Fut, T>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.config.limit;
        tokio::select! {
            result = operation => result,
            _ = self.clock.sleep(limit) => {
                debug!(limit_ms = limit.as_millis() as u64, "attempt exceeded its time budget");
                Err(Fault::timeout(format!(
                    "operation exceeded the {}ms limit",
                    limit.as_millis()
                )))
            }
        }
    }
}

impl std::fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tower layer applying a [`TimeoutPolicy`] to a service.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    policy: TimeoutPolicy,
}

impl TimeoutLayer {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Service produced by [`TimeoutLayer`].
#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    policy: TimeoutPolicy,
}

impl<S, Req> Service<Req> for Timeout<S>
where
    S: Service<Req, Error = Fault> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = Fault;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req);
        let policy = self.policy.clone();
        Box::pin(async move { policy.execute(fut).await })
    }
}
