//! Deadline arithmetic that never overflows.

use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never": thirty years.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, capped at [`FAR_FUTURE`] from `now`.
///
/// Durations such as `Duration::MAX` are valid TTLs and windows; plain
/// `Instant` addition would panic on them.
#[must_use]
pub fn deadline(now: Instant, after: Duration) -> Instant {
    now + after.min(FAR_FUTURE)
}

/// Milliseconds for a store that takes an integer expiry, at least 1 and
/// capped at [`FAR_FUTURE`].
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
#[must_use]
pub fn expiry_millis(after: Duration) -> u64 {
    after.min(FAR_FUTURE).as_millis().max(1) as u64
}
