//! Fault taxonomy and classification.
//!
//! Every policy in this crate signals failure with a [`Fault`], a plain
//! tagged value rather than an opaque boxed error. Policies branch only on
//! the [`FaultKind`] tag; the cause string is carried through unchanged for
//! the final caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Fault>;

/// The category a failure belongs to, as seen by the policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// An error expected to be temporary and worth retrying.
    Transient,
    /// An attempt exceeded its time budget.
    Timeout,
    /// An error that will not go away on its own; never retried.
    Permanent,
    /// Synthetic rejection emitted by an open circuit breaker. Terminal for
    /// the call path; outer retries must not spend budget on it.
    BrokenCircuit,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::Transient => "transient",
            FaultKind::Timeout => "timeout",
            FaultKind::Permanent => "permanent",
            FaultKind::BrokenCircuit => "broken-circuit",
        };
        f.write_str(s)
    }
}

/// A classified failure raised by an operation or synthesized by a policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} fault: {cause}")]
pub struct Fault {
    /// Category the policies act on.
    pub kind: FaultKind,
    /// Human-readable cause, preserved verbatim through every layer.
    pub cause: String,
}

impl Fault {
    pub fn new(kind: FaultKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn transient(cause: impl Into<String>) -> Self {
        Self::new(FaultKind::Transient, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(FaultKind::Timeout, cause)
    }

    pub fn permanent(cause: impl Into<String>) -> Self {
        Self::new(FaultKind::Permanent, cause)
    }

    pub fn broken_circuit(cause: impl Into<String>) -> Self {
        Self::new(FaultKind::BrokenCircuit, cause)
    }
}

/// Map an I/O error onto the fault taxonomy.
///
/// Connection-level conditions are treated as transient, deadline expiry as
/// a timeout, and everything else (missing files, bad input, permissions)
/// as permanent.
pub fn classify_io(error: &std::io::Error) -> FaultKind {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::BrokenPipe
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted => FaultKind::Transient,
        ErrorKind::TimedOut => FaultKind::Timeout,
        _ => FaultKind::Permanent,
    }
}

impl From<std::io::Error> for Fault {
    fn from(error: std::io::Error) -> Self {
        Fault::new(classify_io(&error), error.to_string())
    }
}

/// Decides whether the retry policy should spend an attempt on a fault.
pub trait FaultPredicate: Send + Sync {
    fn retryable(&self, fault: &Fault) -> bool;
}

impl<F> FaultPredicate for F
where
    F: Fn(&Fault) -> bool + Send + Sync,
{
    fn retryable(&self, fault: &Fault) -> bool {
        self(fault)
    }
}

/// Retries transient faults and timeouts. The default predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientOnly;

impl FaultPredicate for TransientOnly {
    fn retryable(&self, fault: &Fault) -> bool {
        matches!(fault.kind, FaultKind::Transient | FaultKind::Timeout)
    }
}

/// Retries transient faults only, treating timeouts as terminal. For
/// callers whose time budget is already spent once an attempt times out.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientOnlyStrict;

impl FaultPredicate for TransientOnlyStrict {
    fn retryable(&self, fault: &Fault) -> bool {
        matches!(fault.kind, FaultKind::Transient)
    }
}

/// Retries every fault the retry loop will consider (broken-circuit
/// rejections are excluded by the loop itself).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl FaultPredicate for AlwaysRetry {
    fn retryable(&self, _fault: &Fault) -> bool {
        true
    }
}
