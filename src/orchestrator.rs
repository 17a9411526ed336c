//! # Analysis Orchestrator
//!
//! The single entry point the embedding application constructs and owns.
//! Wires cache, circuit breakers, failover coordinator and scheduler together
//! from injected dependencies - provider adapters, an optional distributed
//! cache backend, an optional telemetry sink - and exposes the public API.
//!
//! There are no process-wide globals: all mutable state (queue, breaker map,
//! cache) lives inside the orchestrator instance, whose lifetime belongs to
//! the application's startup/shutdown sequence.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use analyzer_core::orchestrator::AnalysisOrchestrator;
//! use analyzer_core::config::AnalyzerConfig;
//! use analyzer_core::scheduler::BatchOptions;
//! use analyzer_core::types::{AnalysisType, BatchRequest};
//!
//! # async fn example(
//! #     adapters: Vec<std::sync::Arc<dyn analyzer_core::providers::ProviderAdapter>>,
//! # ) -> analyzer_core::Result<()> {
//! let orchestrator = AnalysisOrchestrator::new(adapters, AnalyzerConfig::default())?;
//!
//! let requests = vec![
//!     BatchRequest::new("req-1", "fn main() {}", AnalysisType::Vulnerabilities, 0),
//!     BatchRequest::new("req-2", "eval(atob(p))", AnalysisType::Deobfuscate, 1),
//! ];
//! let responses = orchestrator
//!     .submit_batch(requests, BatchOptions::default())
//!     .await?;
//! println!("{} responses", responses.len());
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheStats, DistributedCacheBackend, ResultCache};
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, Result};
use crate::failover::FailoverCoordinator;
use crate::providers::ProviderAdapter;
use crate::resilience::ProviderHealth;
use crate::scheduler::{BatchOptions, BatchScheduler};
use crate::telemetry::{NoopTelemetrySink, TelemetrySink};
use crate::types::{AnalysisResult, AnalysisType, BatchRequest, BatchResponse, QueueStatus};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct AnalysisOrchestrator {
    cache: Arc<ResultCache>,
    coordinator: Arc<FailoverCoordinator>,
    scheduler: BatchScheduler,
}

impl AnalysisOrchestrator {
    pub fn builder() -> AnalysisOrchestratorBuilder {
        AnalysisOrchestratorBuilder::default()
    }

    /// Convenience constructor for the common case: adapters plus config, no
    /// distributed cache tier, no telemetry sink.
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        config: AnalyzerConfig,
    ) -> Result<Self> {
        Self::builder().providers(providers).config(config).build()
    }

    /// Submit a batch of requests and wait for the full response set.
    pub async fn submit_batch(
        &self,
        requests: Vec<BatchRequest>,
        options: BatchOptions,
    ) -> Result<Vec<BatchResponse>> {
        self.scheduler.submit_batch(requests, options).await
    }

    /// Cooperatively cancel an in-progress batch.
    pub fn cancel_batch(&self, batch_id: &str) {
        self.scheduler.cancel_batch(batch_id);
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.scheduler.queue_status()
    }

    /// Analyze a single piece of content outside any batch.
    pub async fn analyze_with_failover(
        &self,
        content: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult> {
        self.coordinator
            .analyze_with_failover(content, analysis_type, &CancellationToken::new())
            .await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Circuit-breaker health for every configured provider.
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.coordinator.provider_health()
    }

    /// Probe every adapter's `health_check`, concurrently. A probe error
    /// reads as unhealthy.
    pub async fn probe_providers(&self) -> Vec<(String, bool)> {
        let probes = self.coordinator.providers().iter().map(|provider| {
            let provider = Arc::clone(provider);
            async move {
                let healthy = provider.health_check().await.unwrap_or(false);
                (provider.name().to_string(), healthy)
            }
        });
        join_all(probes).await
    }

    /// Stop dispatching queued work. In-flight requests run to completion.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[derive(Default)]
pub struct AnalysisOrchestratorBuilder {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    distributed_cache: Option<Arc<dyn DistributedCacheBackend>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    config: Option<AnalyzerConfig>,
}

impl AnalysisOrchestratorBuilder {
    /// Append one provider adapter; order of calls is failover priority order.
    pub fn provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replace the full provider list (failover priority order).
    pub fn providers(mut self, providers: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn distributed_cache(mut self, backend: Arc<dyn DistributedCacheBackend>) -> Self {
        self.distributed_cache = Some(backend);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn config(mut self, config: AnalyzerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<AnalysisOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        if self.providers.is_empty() {
            return Err(AnalyzerError::Configuration(
                "at least one provider adapter is required".to_string(),
            ));
        }

        let telemetry: Arc<dyn TelemetrySink> = self
            .telemetry
            .unwrap_or_else(|| Arc::new(NoopTelemetrySink));

        let cache = Arc::new(match self.distributed_cache {
            Some(backend) => ResultCache::with_backend(config.cache.clone(), backend),
            None => ResultCache::new(config.cache.clone()),
        });

        let coordinator = Arc::new(FailoverCoordinator::new(
            self.providers.clone(),
            Arc::clone(&cache),
            Arc::clone(&telemetry),
            config.failover.clone(),
            config.circuit_breaker.clone(),
        ));

        let scheduler = BatchScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&telemetry),
            config.scheduler.clone(),
        );

        info!(
            providers = self.providers.len(),
            max_concurrency = config.scheduler.max_concurrency,
            "analysis orchestrator initialized"
        );

        Ok(AnalysisOrchestrator {
            cache,
            coordinator,
            scheduler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_providers_is_rejected() {
        let result = AnalysisOrchestrator::builder()
            .config(AnalyzerConfig::default())
            .build();
        assert!(matches!(result, Err(AnalyzerError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = AnalyzerConfig::default();
        config.scheduler.max_concurrency = 0;
        let result = AnalysisOrchestrator::builder().config(config).build();
        assert!(matches!(result, Err(AnalyzerError::Configuration(_))));
    }
}
