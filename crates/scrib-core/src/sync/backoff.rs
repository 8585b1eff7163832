//! Retry backoff schedule

use std::time::Duration;

/// Delay before the `retry_count`-th retry (1-based): exponential from
/// `base`, capped at `cap`.
#[must_use]
pub fn delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }
    let exponent = retry_count - 1;
    if exponent >= 32 {
        return cap;
    }
    base.checked_mul(1 << exponent).map_or(cap, |d| d.min(cap))
}
