//! Circuit breaker state machine.
//!
//! One [`CircuitBreaker`] guards one resource and is shared by every
//! caller of that resource; cloning the breaker clones a handle to the
//! same state. After `failure_threshold` consecutive failures the circuit
//! opens and calls are rejected outright for `break_duration`. The first
//! call after the cooldown is let through as a single probe: its success
//! closes the circuit, its failure re-opens it for another full cooldown.
//!
//! The open-to-half-open transition happens lazily when a call arrives
//! after the cooldown, never on a background timer, so rejection timing
//! under no traffic is unchanged.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::{Fault, Result};

/// The three positions of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow through; consecutive failures are counted.
    Closed,
    /// Calls are rejected without invoking the operation.
    Open,
    /// A single probe call is in progress or about to be admitted.
    HalfOpen,
}

/// Circuit breaker configuration. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Cooldown during which calls are rejected. A failed probe re-arms
    /// the same full duration; shorten it here if a faster ramp-up after
    /// failed probes is wanted.
    pub break_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// State-change notification delivered to the transition hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The circuit tripped; calls will be rejected for the cooldown.
    Opened { consecutive_failures: u32 },
    /// The cooldown elapsed and a probe is being admitted.
    HalfOpened,
    /// A probe succeeded (or the breaker was reset); traffic resumed.
    Closed,
}

// The whole tuple is mutated as one unit under this mutex, never as
// independent field writes. The lock is only ever held for the few
// instructions of a transition, never across an await.
#[derive(Debug)]
struct BreakerShared {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

type TransitionHook = Arc<dyn Fn(BreakerEvent) + Send + Sync>;

/// Protects one resource from being hammered while it is failing.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    shared: Arc<Mutex<BreakerShared>>,
    clock: Arc<dyn Clock>,
    on_transition: Option<TransitionHook>,
}

impl CircuitBreaker {
    /// A closed breaker for the resource `name`.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            shared: Arc::new(Mutex::new(BreakerShared {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
            clock: Arc::new(TokioClock),
            on_transition: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install a hook invoked on every state change. The hook runs outside
    /// the breaker lock.
    pub fn on_transition(mut self, hook: impl Fn(BreakerEvent) + Send + Sync + 'static) -> Self {
        self.on_transition = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position of the breaker. This is a plain read; it does not
    /// move an expired `Open` to `HalfOpen`, only an arriving call does.
    pub fn state(&self) -> CircuitState {
        self.shared.lock().unwrap().state
    }

    /// Consecutive failure count as of the last settled call.
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.lock().unwrap().consecutive_failures
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejected calls fail fast with a `BrokenCircuit` fault and never
    /// invoke `operation`; admitted calls propagate the operation's own
    /// success or fault unchanged while the breaker updates its counts.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.try_admit()?;
        let guard = admission.probe.then(|| ProbeGuard {
            shared: Arc::clone(&self.shared),
            armed: true,
        });

        let result = operation().await;

        if let Some(guard) = guard {
            guard.disarm();
        }
        match &result {
            Ok(_) => self.settle_success(admission.probe),
            Err(fault) => self.settle_failure(admission.probe, fault),
        }
        result
    }

    /// Force the breaker back to `Closed`, clearing all counts.
    pub fn reset(&self) {
        let changed = {
            let mut shared = self.shared.lock().unwrap();
            let changed = shared.state != CircuitState::Closed;
            shared.state = CircuitState::Closed;
            shared.consecutive_failures = 0;
            shared.opened_at = None;
            shared.probe_in_flight = false;
            changed
        };
        if changed {
            info!(circuit = %self.name, "circuit reset to closed");
            self.notify(BreakerEvent::Closed);
        }
    }

    fn try_admit(&self) -> Result<Admission> {
        let (admission, event) = {
            let mut shared = self.shared.lock().unwrap();
            match shared.state {
                CircuitState::Closed => (Ok(Admission { probe: false }), None),
                CircuitState::Open => {
                    let cooled_down = shared
                        .opened_at
                        .map_or(true, |at| self.clock.now() - at >= self.config.break_duration);
                    if cooled_down {
                        shared.state = CircuitState::HalfOpen;
                        shared.opened_at = None;
                        shared.probe_in_flight = true;
                        (Ok(Admission { probe: true }), Some(BreakerEvent::HalfOpened))
                    } else {
                        (
                            Err(Fault::broken_circuit(format!(
                                "circuit '{}' is open",
                                self.name
                            ))),
                            None,
                        )
                    }
                }
                CircuitState::HalfOpen => {
                    if shared.probe_in_flight {
                        (
                            Err(Fault::broken_circuit(format!(
                                "circuit '{}' is half-open with a probe in flight",
                                self.name
                            ))),
                            None,
                        )
                    } else {
                        shared.probe_in_flight = true;
                        (Ok(Admission { probe: true }), None)
                    }
                }
            }
        };

        if let Some(event) = event {
            info!(circuit = %self.name, "circuit half-open, admitting a probe");
            self.notify(event);
        }
        admission
    }

    fn settle_success(&self, was_probe: bool) {
        let event = {
            let mut shared = self.shared.lock().unwrap();
            if was_probe {
                shared.state = CircuitState::Closed;
                shared.consecutive_failures = 0;
                shared.opened_at = None;
                shared.probe_in_flight = false;
                Some(BreakerEvent::Closed)
            } else {
                if shared.state == CircuitState::Closed {
                    shared.consecutive_failures = 0;
                }
                // A non-probe success landing after the circuit has tripped
                // carries no signal about recovery; ignore it.
                None
            }
        };

        if let Some(event) = event {
            info!(circuit = %self.name, "probe succeeded, circuit closed");
            self.notify(event);
        }
    }

    fn settle_failure(&self, was_probe: bool, fault: &Fault) {
        let event = {
            let mut shared = self.shared.lock().unwrap();
            if was_probe {
                shared.state = CircuitState::Open;
                shared.opened_at = Some(self.clock.now());
                shared.probe_in_flight = false;
                Some(BreakerEvent::Opened {
                    consecutive_failures: shared.consecutive_failures,
                })
            } else if shared.state == CircuitState::Closed {
                shared.consecutive_failures += 1;
                if shared.consecutive_failures >= self.config.failure_threshold {
                    shared.state = CircuitState::Open;
                    shared.opened_at = Some(self.clock.now());
                    Some(BreakerEvent::Opened {
                        consecutive_failures: shared.consecutive_failures,
                    })
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(event) = event {
            warn!(
                circuit = %self.name,
                cooldown_ms = self.config.break_duration.as_millis() as u64,
                %fault,
                "circuit opened"
            );
            self.notify(event);
        }
    }

    fn notify(&self, event: BreakerEvent) {
        if let Some(hook) = &self.on_transition {
            hook(event);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Admission {
    probe: bool,
}

// Clears the probe slot if an admitted probe is cancelled before it
// settles, e.g. when an outer timeout drops the call mid-flight. Without
// this the breaker would stay half-open with a phantom probe forever.
struct ProbeGuard {
    shared: Arc<Mutex<BreakerShared>>,
    armed: bool,
}

impl ProbeGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut shared = self.shared.lock().unwrap();
            if shared.state == CircuitState::HalfOpen {
                shared.probe_in_flight = false;
            }
        }
    }
}

/// Tower layer routing a service's calls through a [`CircuitBreaker`].
///
/// Every service built by one layer shares the layer's breaker, which is
/// what a per-resource breaker wants.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: self.breaker.clone(),
        }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S, Req> Service<Req> for CircuitBreakerService<S>
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
        // Admission is decided before the inner service is called, so a
        // rejected request never reaches it.
        let admission = match self.breaker.try_admit() {
            Ok(admission) => admission,
            Err(fault) => return Box::pin(std::future::ready(Err(fault))),
        };
        let guard = admission.probe.then(|| ProbeGuard {
            shared: Arc::clone(&self.breaker.shared),
            armed: true,
        });

        let fut = self.inner.call(req);
        let breaker = self.breaker.clone();
        Box::pin(async move {
            let result = fut.await;
            if let Some(guard) = guard {
                guard.disarm();
            }
            match &result {
                Ok(_) => breaker.settle_success(admission.probe),
                Err(fault) => breaker.settle_failure(admission.probe, fault),
            }
            result
        })
    }
}
