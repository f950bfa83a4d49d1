//! Rate limiting for audio level notifications.

use std::time::{Duration, Instant};

/// Decides when the next audio level should be computed.
///
/// A level is due once strictly more than `interval` has elapsed since the
/// previous one. The first window starts at construction.
#[derive(Debug, Clone)]
pub(crate) struct LevelMeter {
    interval: Duration,
    last: Instant,
}

impl LevelMeter {
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    /// Returns `true` and starts a new window if a level is due at `now`.
    pub(crate) fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) > self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_not_due_within_window() {
        let start = Instant::now();
        let mut meter = LevelMeter::new(INTERVAL, start);
        assert!(!meter.due(start + Duration::from_millis(50)));
        assert!(!meter.due(start + INTERVAL));
    }

    #[test]
    fn test_due_after_window() {
        let start = Instant::now();
        let mut meter = LevelMeter::new(INTERVAL, start);
        assert!(meter.due(start + Duration::from_millis(101)));
        assert!(!meter.due(start + Duration::from_millis(150)));
        assert!(meter.due(start + Duration::from_millis(202)));
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        let start = Instant::now() + Duration::from_secs(1);
        let mut meter = LevelMeter::new(INTERVAL, start);
        assert!(!meter.due(start - Duration::from_millis(500)));
    }
}
