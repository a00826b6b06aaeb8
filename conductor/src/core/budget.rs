//! Wall-clock budget helpers for a run.

use std::time::{Duration, Instant};

/// Remaining time until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

/// Deadline `timeout` from now, saturating instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}
