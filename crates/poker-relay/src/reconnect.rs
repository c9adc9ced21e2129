//! Reconnection backoff for relay clients.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn exceeded(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Delay before reconnect attempt number `attempt` (1-based).
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_initial() {
        let config = ReconnectConfig::default();
        assert_eq!(calculate_backoff(1, &config), Duration::from_millis(500));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = ReconnectConfig::default();
        assert_eq!(calculate_backoff(6, &config), Duration::from_secs(10));
        assert_eq!(calculate_backoff(40, &config), Duration::from_secs(10));
    }

    #[test]
    fn test_attempt_zero_uses_initial_delay() {
        let config = ReconnectConfig::default();
        assert_eq!(calculate_backoff(0, &config), Duration::from_millis(500));
    }

    #[test]
    fn test_max_attempts() {
        let unlimited = ReconnectConfig::default();
        assert!(!unlimited.exceeded(1000));

        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(!limited.exceeded(2));
        assert!(limited.exceeded(3));
    }
}
