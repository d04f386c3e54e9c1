//! ErrorBudget — bounded tolerance for consecutive loop failures.

use std::time::{Duration, Instant};

/// Tracks failure bursts across checker iterations.
///
/// Each recorded error either starts a fresh window (when the previous
/// window has fully elapsed) or increments the count inside the current
/// one. The budget is exhausted once the count reaches the maximum inside
/// a single window; callers are expected to stop and let a supervisor
/// restart the process.
#[derive(Debug)]
pub struct ErrorBudget {
    window_start: Instant,
    count: u32,
    error_interval: Duration,
    max_error_count: u32,
}

impl ErrorBudget {
    pub fn new(error_interval: Duration, max_error_count: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            error_interval,
            max_error_count,
        }
    }

    /// Record one failure. Returns true when the budget is exhausted.
    pub fn record(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    fn record_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) > self.error_interval {
            // Enough error-free time has passed; restart the window.
            self.window_start = now;
            self.count = 1;
        } else {
            self.count += 1;
        }
        self.count >= self.max_error_count
    }

    /// Failures recorded in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_within_window_exhausts() {
        let start = Instant::now();
        let mut budget = ErrorBudget::new(Duration::from_secs(60), 3);
        budget.window_start = start;

        assert!(!budget.record_at(start + Duration::from_secs(1)));
        assert!(!budget.record_at(start + Duration::from_secs(2)));
        assert!(budget.record_at(start + Duration::from_secs(3)));
        assert_eq!(budget.count(), 3);
    }

    #[test]
    fn spaced_failures_keep_resetting() {
        let start = Instant::now();
        let mut budget = ErrorBudget::new(Duration::from_secs(60), 3);
        budget.window_start = start;

        // Each failure lands more than one interval after the previous
        // window start, so the count never climbs past 1.
        let mut at = start + Duration::from_secs(61);
        for _ in 0..10 {
            assert!(!budget.record_at(at));
            assert_eq!(budget.count(), 1);
            at += Duration::from_secs(61);
        }
    }

    #[test]
    fn reset_then_burst_still_exhausts() {
        let start = Instant::now();
        let mut budget = ErrorBudget::new(Duration::from_secs(60), 2);
        budget.window_start = start;

        assert!(!budget.record_at(start + Duration::from_secs(120)));
        assert!(budget.record_at(start + Duration::from_secs(130)));
    }

    #[test]
    fn max_of_one_exhausts_immediately() {
        let mut budget = ErrorBudget::new(Duration::from_secs(60), 1);
        assert!(budget.record());
    }
}
