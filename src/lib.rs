#![allow(clippy::doc_markdown)] // Allow technical terms like SHA-256, TTL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Analyzer Core Rust
//!
//! High-performance orchestration core for content-analysis requests served
//! by interchangeable AI providers.
//!
//! ## Overview
//!
//! The crate accepts batches of analysis requests and guarantees they are
//! executed efficiently, safely and resiliently under concurrent load. It is
//! an in-process library with a programmatic API: provider adapters, an
//! optional distributed cache backend and an optional telemetry sink are
//! injected at construction, and everything else - payload construction, the
//! analysis itself, UI state, persistence - stays outside.
//!
//! ## Architecture
//!
//! Four cooperating components, leaves first:
//!
//! - **Result Cache** ([`cache`]): content-addressed, tiered (bounded local
//!   LRU plus an optional distributed tier), LRU+TTL eviction.
//! - **Circuit Breaker** ([`resilience`]): one per provider, gating calls to
//!   unhealthy backends and re-testing them after a cooldown.
//! - **Failover Coordinator** ([`failover`]): cache fast path, then providers
//!   in priority order, skipping open circuits.
//! - **Priority Batch Scheduler** ([`scheduler`]): strict-priority queue,
//!   bounded worker dispatch, retries with exponential backoff, cooperative
//!   cancellation and progress reporting.
//!
//! Control flow: caller → scheduler → (per request) failover coordinator →
//! cache → circuit breaker gate → provider adapter → cache write-back →
//! progress update → caller.
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - the facade the application constructs and owns
//! - [`scheduler`] - priority batch scheduling and retry handling
//! - [`failover`] - provider selection and failover
//! - [`resilience`] - per-provider circuit breakers
//! - [`cache`] - tiered result cache
//! - [`providers`] - the injected provider adapter seam
//! - [`telemetry`] - fire-and-forget event sink
//! - [`config`] - configuration with environment overrides
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging bootstrap
//! - [`types`] - shared data model
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use analyzer_core::{AnalysisOrchestrator, AnalyzerConfig};
//!
//! # async fn example(
//! #     adapters: Vec<std::sync::Arc<dyn analyzer_core::ProviderAdapter>>,
//! # ) -> analyzer_core::Result<()> {
//! analyzer_core::logging::init_structured_logging();
//!
//! let orchestrator = AnalysisOrchestrator::new(adapters, AnalyzerConfig::from_env()?)?;
//! let status = orchestrator.queue_status();
//! println!("pending: {}", status.pending_requests);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod failover;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod scheduler;
pub mod telemetry;
pub mod types;

pub use cache::{cache_key, CacheStats, DistributedCacheBackend, ResultCache};
pub use config::{AnalyzerConfig, CacheConfig, FailoverConfig, SchedulerConfig};
pub use error::{AnalyzerError, ProviderFailure, Result};
pub use failover::FailoverCoordinator;
pub use orchestrator::{AnalysisOrchestrator, AnalysisOrchestratorBuilder};
pub use providers::{ProviderAdapter, ProviderError};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ProviderHealth,
};
pub use scheduler::{BatchOptions, BatchScheduler, ProgressCallback};
pub use telemetry::{BroadcastTelemetry, NoopTelemetrySink, TelemetryEvent, TelemetrySink};
pub use types::{
    AnalysisResult, AnalysisType, BatchProgress, BatchRequest, BatchResponse, QueueStatus,
};
