//! # Failover Coordinator
//!
//! Routes a single analysis request to the first provider that can serve it.
//!
//! ## Flow
//!
//! 1. Cache fast path: a hit returns immediately - no provider call, no
//!    circuit-breaker interaction, no retry accounting.
//! 2. On a miss, providers are tried in their configured priority order.
//!    A provider whose circuit breaker rejects the call is skipped without a
//!    network round-trip.
//! 3. The first success is recorded on that provider's breaker and written
//!    through to the cache with a TTL.
//! 4. Failures and timeouts are recorded on the breaker and failover
//!    continues; exhaustion raises [`AnalyzerError::AllProvidersFailed`] with
//!    every per-provider reason.
//!
//! A per-call timeout is enforced here and counts as a provider failure. The
//! coordinator holds a priority-ordered list of [`ProviderAdapter`] trait
//! objects; it never dispatches on provider-name strings.

use crate::cache::{cache_key, ResultCache};
use crate::config::FailoverConfig;
use crate::error::{AnalyzerError, ProviderFailure, Result};
use crate::logging;
use crate::providers::{ProviderAdapter, ProviderError};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ProviderHealth};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{AnalysisResult, AnalysisType};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub struct FailoverCoordinator {
    /// Priority order: first adapter is tried first
    providers: Vec<Arc<dyn ProviderAdapter>>,
    breakers: CircuitBreakerRegistry,
    cache: Arc<ResultCache>,
    telemetry: Arc<dyn TelemetrySink>,
    config: FailoverConfig,
}

impl FailoverCoordinator {
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        cache: Arc<ResultCache>,
        telemetry: Arc<dyn TelemetrySink>,
        config: FailoverConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let breakers = CircuitBreakerRegistry::new(breaker_config);
        // Register every provider up front so health snapshots cover the
        // full priority list from the start.
        for provider in &providers {
            breakers.breaker_for(provider.name());
        }

        Self {
            providers,
            breakers,
            cache,
            telemetry,
            config,
        }
    }

    /// Analyze `content`, trying providers in priority order until one
    /// succeeds. Cache hits short-circuit everything.
    #[instrument(skip_all, fields(analysis_type = %analysis_type))]
    pub async fn analyze_with_failover(
        &self,
        content: &str,
        analysis_type: AnalysisType,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let key = cache_key(content, analysis_type, &self.config.params_signature);

        if let Some(hit) = self.cache.get(&key).await {
            debug!(key = %key, "cache hit, no provider call needed");
            self.telemetry.record(TelemetryEvent::CacheHit { key });
            return Ok(hit);
        }
        self.telemetry
            .record(TelemetryEvent::CacheMiss { key: key.clone() });

        let mut failures: Vec<ProviderFailure> = Vec::new();

        for provider in &self.providers {
            if cancel.is_cancelled() {
                return Err(AnalyzerError::Cancelled(
                    "batch cancelled before provider call".to_string(),
                ));
            }

            let name = provider.name().to_string();
            let breaker = self.breakers.breaker_for(&name);

            if !breaker.allow_request() {
                debug!(provider = %name, "circuit breaker rejected call, skipping provider");
                self.telemetry
                    .record(TelemetryEvent::ProviderSkipped { provider: name.clone() });
                failures.push(ProviderFailure {
                    provider: name,
                    reason: "circuit breaker open".to_string(),
                    transient: true,
                });
                continue;
            }

            // allow_request() claims the single Half-Open trial slot when it
            // fires the cooldown transition
            let trial_call = breaker.state() == CircuitState::HalfOpen;

            let started = Instant::now();
            let timeout_ms = self.config.call_timeout.as_millis() as u64;
            let outcome = match timeout(
                self.config.call_timeout,
                provider.call(content, analysis_type, cancel.clone(), self.config.call_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout { timeout_ms }),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(result) => {
                    let state_before = breaker.state();
                    breaker.record_success();
                    if state_before == CircuitState::HalfOpen {
                        self.telemetry
                            .record(TelemetryEvent::CircuitClosed { provider: name.clone() });
                    }

                    logging::log_provider_operation("analyze", &name, "success", Some(duration_ms));
                    self.cache
                        .set(&key, result.clone(), self.config.cache_ttl)
                        .await;
                    return Ok(result);
                }
                Err(error) => {
                    // An adapter that honors the cancellation token surfaces
                    // its abort as an error; that is a drop, not a provider
                    // failure, and must not poison the breaker.
                    if cancel.is_cancelled() {
                        if trial_call {
                            breaker.release_trial();
                        }
                        return Err(AnalyzerError::Cancelled(format!(
                            "batch cancelled during call to '{name}'"
                        )));
                    }

                    let state_before = breaker.state();
                    breaker.record_failure();
                    if state_before != CircuitState::Open
                        && breaker.state() == CircuitState::Open
                    {
                        self.telemetry
                            .record(TelemetryEvent::CircuitOpened { provider: name.clone() });
                    }

                    warn!(
                        provider = %name,
                        error = %error,
                        duration_ms = duration_ms,
                        "provider call failed, trying next provider"
                    );
                    self.telemetry.record(TelemetryEvent::ProviderCallFailed {
                        provider: name.clone(),
                        reason: error.to_string(),
                    });
                    failures.push(ProviderFailure {
                        provider: name,
                        reason: error.to_string(),
                        transient: error.is_transient(),
                    });
                }
            }
        }

        let error = AnalyzerError::AllProvidersFailed { reasons: failures };
        logging::log_error("failover", "analyze_with_failover", &error.to_string(), None);
        Err(error)
    }

    /// Health snapshots for every provider's circuit breaker
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.breakers.snapshot()
    }

    /// The configured providers in priority order
    pub fn providers(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.providers
    }
}
