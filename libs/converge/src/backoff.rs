//! Poll cadence.

use std::time::Duration;

use crate::{INITIAL_BACKOFF, MAX_BACKOFF, MAX_POLL_INTERVAL};

/// Jitter-free poll schedule for one wait.
///
/// With a usable fixed interval every wait is that interval. Otherwise the
/// wait starts at [`INITIAL_BACKOFF`], doubles after each observation that is
/// not part of a target streak, and is bounded below by `min` and above by
/// [`MAX_BACKOFF`]. When `min` exceeds the ceiling, `min` wins.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    fixed: Option<Duration>,
}

impl Backoff {
    pub fn new(min: Duration, fixed: Option<Duration>) -> Self {
        let fixed = fixed.filter(|p| !p.is_zero() && *p < MAX_POLL_INTERVAL);
        Self {
            current: INITIAL_BACKOFF,
            min,
            fixed,
        }
    }

    /// Interval before the next poll.
    ///
    /// `grow` is false while the resource is straddling its target state, so
    /// the follow-up observations that confirm convergence come quickly.
    pub fn next(&mut self, grow: bool) -> Duration {
        if grow {
            self.current = self.current.saturating_mul(2);
        }

        if let Some(fixed) = self.fixed {
            return fixed;
        }

        let ceiling = MAX_BACKOFF.max(self.min);
        self.current = self.current.clamp(self.min, ceiling);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let mut backoff = Backoff::new(Duration::ZERO, None);
        let waits: Vec<_> = (0..10).map(|_| backoff.next(true)).collect();

        assert_eq!(waits[0], Duration::from_millis(200));
        assert_eq!(waits[1], Duration::from_millis(400));
        assert_eq!(waits[2], Duration::from_millis(800));
        assert_eq!(waits[9], MAX_BACKOFF);
    }

    #[test]
    fn test_backoff_holds_during_target_streak() {
        let mut backoff = Backoff::new(Duration::ZERO, None);
        let first = backoff.next(true);
        assert_eq!(backoff.next(false), first);
        assert_eq!(backoff.next(false), first);
    }

    #[test]
    fn test_backoff_min_floor() {
        let mut backoff = Backoff::new(Duration::from_secs(3), None);
        assert_eq!(backoff.next(true), Duration::from_secs(3));
        assert_eq!(backoff.next(true), Duration::from_secs(6));
        assert_eq!(backoff.next(true), MAX_BACKOFF);
    }

    #[test]
    fn test_fixed_interval() {
        let mut backoff = Backoff::new(Duration::ZERO, Some(Duration::from_secs(5)));
        assert_eq!(backoff.next(true), Duration::from_secs(5));
        assert_eq!(backoff.next(false), Duration::from_secs(5));
    }

    #[test]
    fn test_fixed_interval_out_of_bounds_falls_back() {
        let mut backoff = Backoff::new(Duration::ZERO, Some(Duration::from_secs(600)));
        assert_eq!(backoff.next(true), Duration::from_millis(200));
    }

    proptest! {
        #[test]
        fn prop_backoff_within_bounds(
            min_ms in 0u64..20_000,
            grows in proptest::collection::vec(any::<bool>(), 1..64),
        ) {
            let min = Duration::from_millis(min_ms);
            let mut backoff = Backoff::new(min, None);
            let ceiling = min.max(MAX_BACKOFF);
            for grow in grows {
                let wait = backoff.next(grow);
                prop_assert!(wait >= min);
                prop_assert!(wait <= ceiling);
            }
        }
    }
}
