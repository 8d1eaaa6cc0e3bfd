use std::time::Duration;

/// Delay before reconnect attempt `attempt` (zero-based): `base * 2^attempt`.
///
/// Saturates instead of overflowing for large attempt numbers.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
