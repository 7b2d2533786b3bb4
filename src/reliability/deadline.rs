//! Deadline arithmetic that cannot overflow.

use std::time::Duration;
use tokio::time::Instant;

/// Roughly thirty years out. Used when a wait is too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `Instant::now() + wait`, saturating to a far-future instant.
pub fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// `from + wait`, capped at `limit`.
pub fn capped_deadline(from: Instant, wait: Duration, limit: Instant) -> Instant {
    from.checked_add(wait).map_or(limit, |at| at.min(limit))
}
