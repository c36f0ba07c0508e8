//! Client tunables and the reconnection backoff schedule.

use std::time::Duration;

/// Reconnection parameters.
///
/// Defaults match production behavior; tests shrink `initial_delay` so
/// the backoff loop runs in milliseconds.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnection attempts before the client gives up.
    pub max_attempts: u32,
    /// Delay before the first attempt; each later attempt doubles it.
    pub initial_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Delay before the 1-based `attempt`: `initial_delay * 2^(n-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(31))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_each_attempt() {
        let config = ClientConfig::default();
        let schedule: Vec<u64> = (1..=config.max_attempts)
            .map(|n| config.backoff_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(schedule, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_backoff_delay_scales_with_initial_delay() {
        let config = ClientConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
        };
        assert_eq!(config.backoff_delay(3), Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_delay_saturates_on_large_attempt() {
        let config = ClientConfig::default();
        // No overflow panic, just a very long delay.
        assert!(config.backoff_delay(64) >= config.backoff_delay(32));
    }
}
