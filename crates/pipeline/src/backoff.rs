//! Exponential backoff between completion polls.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second poll.
    pub initial_delay: Duration,
    /// Upper bound on the delay between polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each poll.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_multiplier_until_cap() {
        let config = BackoffConfig::default();
        let mut delay = config.initial_delay;
        let mut seen = vec![delay];
        for _ in 0..8 {
            delay = next_delay(delay, &config);
            seen.push(delay);
        }
        assert_eq!(seen[1], Duration::from_millis(750));
        assert_eq!(seen[2], Duration::from_millis(1125));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(5));
    }
}
