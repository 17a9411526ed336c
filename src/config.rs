use crate::error::{AnalyzerError, Result};
use crate::resilience::CircuitBreakerConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub scheduler: SchedulerConfig,
    pub failover: FailoverConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size; never more requests in flight than this
    pub max_concurrency: usize,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Ceiling for the computed backoff delay
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Per provider-call timeout; a timeout counts as a provider failure
    pub call_timeout: Duration,
    /// TTL applied when writing results through to the cache
    pub cache_ttl: Duration,
    /// Folded into the cache key; bump it when analysis parameters change
    pub params_signature: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    /// TTL used when promoting distributed-tier hits into the local tier
    pub default_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            params_signature: "v1".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 1024,
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            failover: FailoverConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(max_concurrency) = std::env::var("ANALYZER_MAX_CONCURRENCY") {
            config.scheduler.max_concurrency = max_concurrency.parse().map_err(|e| {
                AnalyzerError::Configuration(format!("Invalid max_concurrency: {e}"))
            })?;
        }

        if let Ok(backoff_base_ms) = std::env::var("ANALYZER_BACKOFF_BASE_MS") {
            config.scheduler.backoff_base = Duration::from_millis(
                backoff_base_ms.parse().map_err(|e| {
                    AnalyzerError::Configuration(format!("Invalid backoff_base_ms: {e}"))
                })?,
            );
        }

        if let Ok(backoff_max_ms) = std::env::var("ANALYZER_BACKOFF_MAX_MS") {
            config.scheduler.backoff_max = Duration::from_millis(
                backoff_max_ms.parse().map_err(|e| {
                    AnalyzerError::Configuration(format!("Invalid backoff_max_ms: {e}"))
                })?,
            );
        }

        if let Ok(call_timeout_ms) = std::env::var("ANALYZER_CALL_TIMEOUT_MS") {
            config.failover.call_timeout = Duration::from_millis(
                call_timeout_ms.parse().map_err(|e| {
                    AnalyzerError::Configuration(format!("Invalid call_timeout_ms: {e}"))
                })?,
            );
        }

        if let Ok(cache_ttl_secs) = std::env::var("ANALYZER_CACHE_TTL_SECS") {
            config.failover.cache_ttl = Duration::from_secs(cache_ttl_secs.parse().map_err(
                |e| AnalyzerError::Configuration(format!("Invalid cache_ttl_secs: {e}")),
            )?);
        }

        if let Ok(max_bytes) = std::env::var("ANALYZER_CACHE_MAX_BYTES") {
            config.cache.max_bytes = max_bytes
                .parse()
                .map_err(|e| AnalyzerError::Configuration(format!("Invalid cache max_bytes: {e}")))?;
        }

        if let Ok(max_entries) = std::env::var("ANALYZER_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max_entries.parse().map_err(|e| {
                AnalyzerError::Configuration(format!("Invalid cache max_entries: {e}"))
            })?;
        }

        if let Ok(failure_threshold) = std::env::var("ANALYZER_BREAKER_FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold = failure_threshold.parse().map_err(|e| {
                AnalyzerError::Configuration(format!("Invalid breaker failure_threshold: {e}"))
            })?;
        }

        if let Ok(cooldown_secs) = std::env::var("ANALYZER_BREAKER_COOLDOWN_SECS") {
            config.circuit_breaker.cooldown = Duration::from_secs(cooldown_secs.parse().map_err(
                |e| AnalyzerError::Configuration(format!("Invalid breaker cooldown_secs: {e}")),
            )?);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrency == 0 {
            return Err(AnalyzerError::Configuration(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AnalyzerError::Configuration(
                "breaker failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_bytes == 0 || self.cache.max_entries == 0 {
            return Err(AnalyzerError::Configuration(
                "cache capacity limits must be greater than 0".to_string(),
            ));
        }
        if self.failover.call_timeout.is_zero() {
            return Err(AnalyzerError::Configuration(
                "call_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrency, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = AnalyzerConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(AnalyzerError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("ANALYZER_MAX_CONCURRENCY", "not-a-number");
        let result = AnalyzerConfig::from_env();
        std::env::remove_var("ANALYZER_MAX_CONCURRENCY");
        assert!(matches!(result, Err(AnalyzerError::Configuration(_))));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("ANALYZER_BREAKER_COOLDOWN_SECS", "7");
        let config = AnalyzerConfig::from_env().unwrap();
        std::env::remove_var("ANALYZER_BREAKER_COOLDOWN_SECS");
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(7));
    }
}
