//! Per-user submission throttle.
//!
//! Enforces a minimum interval between two submissions from the same user.
//! Owned by whoever accepts requests; the orchestrator knows nothing about
//! users.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default minimum gap between one user's submissions.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10);

pub struct SubmissionThrottle {
    min_interval: Duration,
    last_submission: Mutex<HashMap<String, Instant>>,
}

impl SubmissionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_submission: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Record a submission for `user` if the interval has passed.
    ///
    /// Returns the remaining wait when the user submitted too recently. The
    /// check and the update happen under one lock, so two concurrent
    /// requests from the same user cannot both pass. Every accepted
    /// submission drops entries whose interval has already elapsed.
    pub fn check_and_record(&self, user: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut last = self
            .last_submission
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if let Some(previous) = last.get(user) {
            let elapsed = now.duration_since(*previous);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }

        let min_interval = self.min_interval;
        last.retain(|_, at| now.duration_since(*at) < min_interval);
        last.insert(user.to_string(), now);
        Ok(())
    }

    /// Forget a user's last submission (e.g. when the submit itself failed).
    pub fn release(&self, user: &str) {
        self.last_submission
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user);
    }
}

impl Default for SubmissionThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn second_submission_inside_interval_is_rejected() {
        let throttle = SubmissionThrottle::new(Duration::from_secs(60));
        assert!(throttle.check_and_record("alice").is_ok());
        let wait = throttle.check_and_record("alice").unwrap_err();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::from_secs(50));
    }

    #[test]
    fn users_are_independent() {
        let throttle = SubmissionThrottle::new(Duration::from_secs(60));
        assert!(throttle.check_and_record("alice").is_ok());
        assert!(throttle.check_and_record("bob").is_ok());
    }

    #[test]
    fn zero_interval_never_throttles() {
        let throttle = SubmissionThrottle::new(Duration::ZERO);
        assert!(throttle.check_and_record("alice").is_ok());
        assert!(throttle.check_and_record("alice").is_ok());
    }

    #[test]
    fn release_allows_immediate_retry() {
        let throttle = SubmissionThrottle::new(Duration::from_secs(60));
        throttle.check_and_record("alice").unwrap();
        throttle.release("alice");
        assert!(throttle.check_and_record("alice").is_ok());
    }

    #[test]
    fn expired_entries_are_pruned_on_insert() {
        let throttle = SubmissionThrottle::new(Duration::from_millis(20));
        throttle.check_and_record("alice").unwrap();
        std::thread::sleep(Duration::from_millis(40));
        throttle.check_and_record("bob").unwrap();

        let last = throttle.last_submission.lock().unwrap();
        assert!(!last.contains_key("alice"));
        assert!(last.contains_key("bob"));
    }

    #[test]
    fn concurrent_submissions_admit_exactly_one() {
        let throttle = Arc::new(SubmissionThrottle::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || throttle.check_and_record("carol").is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
