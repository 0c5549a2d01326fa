//! # breakwater
//!
//! Composable fault-handling policies for unreliable calls: timeout, retry
//! with exponential backoff, and a circuit breaker, built on the Tower
//! `Service`/`Layer` model and running on Tokio.
//!
//! ## Core Concepts
//!
//! - **Fault**: every failure is a plain `Fault { kind, cause }` value;
//!   policies decide what to do from the kind alone and pass the rest
//!   through untouched.
//! - **Policies**: each policy exposes an `execute` entry point around a
//!   single operation and a Tower `Layer` for service stacks.
//! - **Composition**: policies nest to any depth, either by stacking
//!   layers or by wrapping an [`Operation`] with [`wrap`](RetryPolicy::wrap),
//!   and a fault raised deep inside surfaces with its kind intact.
//! - **Clock injection**: time and sleeping go through a [`Clock`], so
//!   tests walk through cooldowns and backoff schedules without waiting.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use breakwater::{
//!     BreakerConfig, CircuitBreaker, Operation, RetryConfig, RetryPolicy,
//!     TimeoutConfig, TimeoutPolicy,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> breakwater::Result<String> {
//! // The unreliable call, as an opaque zero-argument operation.
//! let op = Operation::new(|| async {
//!     // e.g. an HTTP request or database query
//!     Ok("payload".to_string())
//! });
//!
//! // One breaker per protected resource, shared by all its callers.
//! let breaker = CircuitBreaker::new("orders-db", BreakerConfig::default());
//!
//! let timeout = TimeoutPolicy::new(TimeoutConfig {
//!     limit: Duration::from_secs(2),
//! });
//! let retry = RetryPolicy::new(RetryConfig {
//!     max_attempts: 3,
//!     base_delay: Duration::from_secs(2),
//!     ..RetryConfig::default()
//! });
//!
//! // Retry around timeout around the breaker around the raw call.
//! let mut guarded = retry.wrap(timeout.wrap(breaker.wrap(op)));
//! guarded.invoke().await
//! # }
//! ```

pub mod breaker;
pub mod clock;
pub mod compose;
pub mod config;
pub mod error;
pub mod retry;
pub mod timeout;

pub use breaker::{
    BreakerConfig, BreakerEvent, CircuitBreaker, CircuitBreakerLayer, CircuitBreakerService,
    CircuitState,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use compose::{Operation, OperationFuture};
pub use config::{from_env, from_file, ConfigBuilder, ResilienceConfig};
pub use error::{
    classify_io, AlwaysRetry, Fault, FaultKind, FaultPredicate, Result, TransientOnly,
    TransientOnlyStrict,
};
pub use retry::{Retry, RetryConfig, RetryLayer, RetryPolicy};
pub use timeout::{Timeout, TimeoutConfig, TimeoutLayer, TimeoutPolicy};

// Re-export the Tower traits callers need for the layer forms.
pub use tower::{Layer, Service, ServiceExt};
