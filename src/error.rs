use serde::{Deserialize, Serialize};

/// A single provider's failure during a failover sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Provider that failed or was skipped
    pub provider: String,

    /// Human-readable failure reason
    pub reason: String,

    /// Whether the failure is transient (retrying may succeed)
    pub transient: bool,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// Malformed or duplicate request in a submitted batch; rejected before
    /// enqueue, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Every eligible provider failed or was circuit-open.
    #[error("all providers failed or were unavailable: [{}]", format_failures(.reasons))]
    AllProvidersFailed { reasons: Vec<ProviderFailure> },

    /// Distributed cache tier unreachable; logged and non-fatal at call sites.
    #[error("cache backend error: {0}")]
    CacheBackend(String),

    /// Request dropped due to batch cancellation; not counted as a failure.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AnalyzerError {
    /// Whether a scheduler-level retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalyzerError::AllProvidersFailed { reasons } => {
                reasons.iter().any(|failure| failure.transient)
            }
            AnalyzerError::CacheBackend(_) => true,
            AnalyzerError::Validation(_)
            | AnalyzerError::Cancelled(_)
            | AnalyzerError::Configuration(_) => false,
        }
    }
}

fn format_failures(reasons: &[ProviderFailure]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(provider: &str, transient: bool) -> ProviderFailure {
        ProviderFailure {
            provider: provider.to_string(),
            reason: "boom".to_string(),
            transient,
        }
    }

    #[test]
    fn test_all_providers_failed_lists_reasons() {
        let error = AnalyzerError::AllProvidersFailed {
            reasons: vec![failure("claude", true), failure("openai", false)],
        };
        let message = error.to_string();
        assert!(message.contains("claude: boom"));
        assert!(message.contains("openai: boom"));
    }

    #[test]
    fn test_retryable_when_any_failure_is_transient() {
        let retryable = AnalyzerError::AllProvidersFailed {
            reasons: vec![failure("claude", false), failure("openai", true)],
        };
        assert!(retryable.is_retryable());

        let permanent = AnalyzerError::AllProvidersFailed {
            reasons: vec![failure("claude", false)],
        };
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!AnalyzerError::Validation("bad".to_string()).is_retryable());
        assert!(!AnalyzerError::Cancelled("batch gone".to_string()).is_retryable());
        assert!(!AnalyzerError::Configuration("zero".to_string()).is_retryable());
    }
}
