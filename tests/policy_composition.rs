//! End-to-end composition behavior: retry wrapping timeout wrapping a raw
//! operation, in both the `Operation` form and the Tower layer form.
//!
//! All timing assertions run on Tokio's paused clock, so the multi-second
//! schedules here complete instantly and deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breakwater::{
    Fault, FaultKind, Layer, Operation, Result, RetryConfig, RetryLayer, RetryPolicy, Service,
    ServiceExt, TimeoutConfig, TimeoutLayer, TimeoutPolicy,
};
use tokio::time::{sleep, Instant};
use tower::service_fn;

fn retry_two_seconds_doubling(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        base_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(60),
        jitter: false,
    })
}

#[tokio::test(start_paused = true)]
async fn retry_around_timeout_times_out_every_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // The operation always takes longer than the 2s limit.
    let op = Operation::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            sleep(Duration::from_secs(30)).await;
            Ok("unreachable")
        }
    });

    let timeout = TimeoutPolicy::new(TimeoutConfig {
        limit: Duration::from_secs(2),
    });
    let retry = retry_two_seconds_doubling(3);

    let start = Instant::now();
    let mut guarded = retry.wrap(timeout.wrap(op));
    let fault = guarded.invoke().await.unwrap_err();
    let elapsed = Instant::now() - start;

    assert_eq!(fault.kind, FaultKind::Timeout);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Three 2s attempts plus 2s and 4s backoff delays.
    assert_eq!(elapsed, Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn flaky_api_recovers_on_the_third_attempt() {
    // Attempt 1 fails like an HTTP 500, attempt 2 hangs until the timeout
    // cuts it off, attempt 3 succeeds.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let op = Operation::new(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            match attempt {
                1 => Err(Fault::transient("HTTP 500: Internal Server Error")),
                2 => {
                    sleep(Duration::from_secs(30)).await;
                    Ok("late".to_string())
                }
                _ => Ok("data".to_string()),
            }
        }
    });

    let timeout = TimeoutPolicy::new(TimeoutConfig {
        limit: Duration::from_secs(2),
    });
    let retry = retry_two_seconds_doubling(3);

    let start = Instant::now();
    let mut guarded = retry.wrap(timeout.wrap(op));
    let value = guarded.invoke().await.unwrap();
    let elapsed = Instant::now() - start;

    assert_eq!(value, "data");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Fast failure, 2s backoff, 2s timed-out attempt, 4s backoff, fast
    // success.
    assert_eq!(elapsed, Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn layer_stack_behaves_like_operation_composition() {
    static CALLED: AtomicUsize = AtomicUsize::new(0);
    let svc = service_fn(|()| async {
        CALLED.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_secs(30)).await;
        Ok::<_, Fault>("unreachable")
    });

    let timeout = TimeoutLayer::new(TimeoutPolicy::new(TimeoutConfig {
        limit: Duration::from_secs(2),
    }));
    let retry = RetryLayer::new(retry_two_seconds_doubling(3));

    // Retry is the outer layer, timeout the inner one.
    let mut stack = retry.layer(timeout.layer(svc));

    let start = Instant::now();
    let fault = ServiceExt::ready(&mut stack)
        .await
        .unwrap()
        .call(())
        .await
        .unwrap_err();
    let elapsed = Instant::now() - start;

    assert_eq!(fault.kind, FaultKind::Timeout);
    assert_eq!(CALLED.load(Ordering::SeqCst), 3);
    assert_eq!(elapsed, Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn permanent_fault_passes_through_both_layers_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let op = Operation::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(Fault::permanent("no such table: orders")) }
    });

    let timeout = TimeoutPolicy::new(TimeoutConfig {
        limit: Duration::from_secs(2),
    });
    let retry = retry_two_seconds_doubling(5);

    let mut guarded = retry.wrap(timeout.wrap(op));
    let fault = guarded.invoke().await.unwrap_err();

    // The kind and cause cross both layer boundaries untouched, and no
    // retry budget is spent.
    assert_eq!(fault.kind, FaultKind::Permanent);
    assert_eq!(fault.cause, "no such table: orders");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn wrap_order_is_explicit_timeout_outside_bounds_delays_too() {
    // With timeout as the outermost layer the whole retry schedule shares
    // one 3s budget, so the second attempt never starts its own timer.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let op = Operation::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(Fault::transient("busy")) }
    });

    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(60),
        jitter: false,
    });
    let timeout = TimeoutPolicy::new(TimeoutConfig {
        limit: Duration::from_secs(3),
    });

    let start = Instant::now();
    let mut guarded = timeout.wrap(retry.wrap(op));
    let fault = guarded.invoke().await.unwrap_err();
    let elapsed = Instant::now() - start;

    assert_eq!(fault.kind, FaultKind::Timeout);
    assert_eq!(elapsed, Duration::from_secs(3));
    // Attempt 1 at t=0 and attempt 2 at t=2s ran; attempt 3 was due at
    // t=6s, past the outer limit.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_reports_the_last_fault_not_the_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let op = Operation::new(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err::<(), _>(Fault::transient(format!("failure on attempt {attempt}"))) }
    });

    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        ..RetryConfig::default()
    });

    let mut guarded = retry.wrap(op);
    let fault = guarded.invoke().await.unwrap_err();
    assert_eq!(fault.cause, "failure on attempt 3");
}

#[tokio::test(start_paused = true)]
async fn composed_result_type_round_trips_success_values() {
    let op = Operation::new(|| async { Ok(vec![1u8, 2, 3]) });
    let timeout = TimeoutPolicy::new(TimeoutConfig::default());
    let retry = RetryPolicy::new(RetryConfig::default());

    let mut guarded = retry.wrap(timeout.wrap(op));
    let value: Result<Vec<u8>> = guarded.invoke().await;
    assert_eq!(value.unwrap(), vec![1, 2, 3]);
}
