//! Property-based checks on the backoff schedule.

use std::time::Duration;

use breakwater::RetryConfig;
use proptest::prelude::*;

fn config(base_ms: u64, multiplier: f64, cap_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_millis(base_ms),
        backoff_multiplier: multiplier,
        max_delay: Duration::from_millis(cap_ms),
        jitter: false,
    }
}

proptest! {
    #[test]
    fn delay_never_exceeds_the_ceiling(
        base_ms in 1u64..10_000,
        multiplier in 1.0f64..16.0,
        cap_ms in 1u64..120_000,
        attempt in 1u32..500,
    ) {
        let config = config(base_ms, multiplier, cap_ms);
        prop_assert!(config.delay_after(attempt) <= Duration::from_millis(cap_ms));
    }

    #[test]
    fn delays_never_decrease_between_attempts(
        base_ms in 1u64..10_000,
        multiplier in 1.0f64..16.0,
        cap_ms in 1u64..120_000,
    ) {
        let config = config(base_ms, multiplier, cap_ms);
        for attempt in 1u32..50 {
            prop_assert!(config.delay_after(attempt) <= config.delay_after(attempt + 1));
        }
    }

    #[test]
    fn first_delay_is_the_base_delay_or_the_ceiling(
        base_ms in 1u64..10_000,
        multiplier in 1.0f64..16.0,
        cap_ms in 1u64..120_000,
    ) {
        let config = config(base_ms, multiplier, cap_ms);
        let expected = Duration::from_millis(base_ms.min(cap_ms));
        prop_assert_eq!(config.delay_after(1), expected);
    }
}
