use std::time::Duration;

/// Delay inserted after failed attempt `attempt_index` (0-based).
///
/// `base * 2^attempt_index`, saturating instead of overflowing.
pub fn backoff_delay(base: Duration, attempt_index: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Every delay a device can wait through when all `max_attempts` fail.
///
/// There is no wait after the final attempt, so the schedule has
/// `max_attempts - 1` entries.
pub fn backoff_schedule(base: Duration, max_attempts: u32) -> Vec<Duration> {
    (0..max_attempts.saturating_sub(1))
        .map(|i| backoff_delay(base, i))
        .collect()
}
