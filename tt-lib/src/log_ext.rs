//! Rate-limited logging for the two diagnostic-only error kinds
//! (`MissedDeadline`, `Collision` — spec §7: "logged at a rate-limited info
//! level; the scheduler continues").
//!
//! Grounded on the `AtomicU32` counter idiom used throughout
//! `drivers/src/net/pool.rs` and `neighbor.rs` for cheap, lock-free
//! bookkeeping, rather than a timestamp-based limiter — ticks here are the
//! unit the send loop already counts in, so a fire-count modulus is both
//! simpler and cheaper than reading a clock on every suppressed message.

use core::sync::atomic::{AtomicU32, Ordering};

/// Emits at most once every `period` calls; the skipped count is folded
/// into the next emitted message so nothing is silently lost from view.
pub struct RateLimiter {
    period: u32,
    count: AtomicU32,
}

impl RateLimiter {
    pub const fn new(period: u32) -> Self {
        Self {
            period: if period == 0 { 1 } else { period },
            count: AtomicU32::new(0),
        }
    }

    /// Returns `Some(suppressed)` on the call that should actually log,
    /// where `suppressed` is how many prior calls were dropped since the
    /// last emission. Returns `None` when this call should be suppressed.
    pub fn poll(&self) -> Option<u32> {
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        if prev % self.period == 0 {
            Some(prev)
        } else {
            None
        }
    }
}

/// Log `msg` (already formatted) through [`RateLimiter`] at `warn` level.
#[macro_export]
macro_rules! warn_ratelimited {
    ($limiter:expr, $($arg:tt)+) => {
        if let Some(suppressed) = $limiter.poll() {
            log::warn!("{} (suppressed {} since last)", format_args!($($arg)+), suppressed);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_first_and_then_every_period() {
        let rl = RateLimiter::new(3);
        assert_eq!(rl.poll(), Some(0));
        assert_eq!(rl.poll(), None);
        assert_eq!(rl.poll(), None);
        assert_eq!(rl.poll(), Some(3));
    }

    #[test]
    fn period_zero_is_treated_as_one() {
        let rl = RateLimiter::new(0);
        assert_eq!(rl.poll(), Some(0));
        assert_eq!(rl.poll(), Some(1));
    }
}
