//! Registry configuration

use std::time::Duration;

/// Resource registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound for any single media engine call
    pub engine_timeout: Duration,

    /// Interval of the periodic stats sweep
    pub stats_interval: Duration,

    /// Priority assigned to new consumers
    pub default_consumer_priority: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(5),
            default_consumer_priority: 1,
        }
    }
}

impl RegistryConfig {
    /// Set the media engine call timeout
    pub fn engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    /// Set the stats sweep interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Set the initial consumer priority (at least 1)
    pub fn default_consumer_priority(mut self, priority: u32) -> Self {
        self.default_consumer_priority = priority.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.engine_timeout, Duration::from_secs(10));
        assert_eq!(config.default_consumer_priority, 1);
    }

    #[test]
    fn test_priority_floor() {
        let config = RegistryConfig::default().default_consumer_priority(0);
        assert_eq!(config.default_consumer_priority, 1);
    }
}
