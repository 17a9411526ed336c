//! # Provider Adapter Seam
//!
//! The core never builds provider-specific payloads or parses provider
//! responses; it talks to every analysis backend through [`ProviderAdapter`].
//! One adapter per provider is injected at orchestrator construction, in
//! priority order. The failover coordinator holds the adapters as trait
//! objects and never dispatches on provider-name strings.
//!
//! [`ProviderError`] classifies failures as transient or permanent, which
//! drives both circuit-breaker accounting and the scheduler's decision to
//! re-enqueue a request.

use crate::types::{AnalysisResult, AnalysisType};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error raised by a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Transient errors may succeed on retry or on another provider;
    /// permanent errors (bad credentials, malformed request) will not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout { .. }
            | ProviderError::RateLimited(_)
            | ProviderError::Network(_) => true,
            ProviderError::Upstream { status, .. } => *status >= 500,
            ProviderError::Auth(_) | ProviderError::InvalidRequest(_) => false,
            // Unknown errors are not retried
            ProviderError::Other(_) => false,
        }
    }
}

/// One injected adapter per analysis provider.
///
/// `call` receives the batch's cancellation token so an in-flight network
/// request can be aborted when the batch is cancelled, and the per-call
/// timeout so the adapter can configure its client accordingly. The
/// coordinator enforces the timeout regardless.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        content: &str,
        analysis_type: AnalysisType,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<AnalysisResult, ProviderError>;

    /// Lightweight reachability probe; adapters without a cheap probe keep
    /// the default.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
