//! Admission delay policy.
//!
//! Every connection attempt for a namespace bumps a short-lived counter. The
//! first attempt inside the window passes straight through; later ones wait
//! proportionally to how many arrived, so bursts against a fresh namespace
//! spread out while the first connection creates the room.

use std::time::Duration;

/// Delay added per concurrent attempt.
pub const DELAY_STEP: Duration = Duration::from_millis(10);

/// Upper bound on the delay.
pub const MAX_DELAY: Duration = Duration::from_millis(4000);

/// Lifetime of the attempt counter, started by the first attempt.
pub const COUNTER_TTL: Duration = Duration::from_secs(1);

/// Backoff for the `concurrency`-th attempt in the current window.
pub fn backoff_for(concurrency: u64) -> Option<Duration> {
    if concurrency <= 1 {
        return None;
    }
    let steps = u32::try_from(concurrency).unwrap_or(u32::MAX);
    Some(DELAY_STEP.saturating_mul(steps).min(MAX_DELAY))
}

/// Counter key for `ns`.
pub fn delay_key(ns: &str) -> String {
    format!("{ns}:d")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_free() {
        assert_eq!(backoff_for(0), None);
        assert_eq!(backoff_for(1), None);
    }

    #[test]
    fn later_attempts_scale_linearly() {
        assert_eq!(backoff_for(2), Some(Duration::from_millis(20)));
        assert_eq!(backoff_for(15), Some(Duration::from_millis(150)));
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(backoff_for(400), Some(MAX_DELAY));
        assert_eq!(backoff_for(u64::MAX), Some(MAX_DELAY));
    }

    #[test]
    fn key_format() {
        assert_eq!(delay_key("/room/1"), "/room/1:d");
    }
}
