//! Shared fixtures for integration tests: scripted provider adapters,
//! in-memory and failing distributed-cache backends, and a collecting
//! telemetry sink.

#![allow(dead_code)] // not every test file uses every fixture

use analyzer_core::cache::DistributedCacheBackend;
use analyzer_core::error::{AnalyzerError, Result};
use analyzer_core::providers::{ProviderAdapter, ProviderError};
use analyzer_core::telemetry::{TelemetryEvent, TelemetrySink};
use analyzer_core::types::{AnalysisResult, AnalysisType};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a [`MockProvider`] does on each call.
pub enum MockBehavior {
    Succeed,
    /// Network-style error; retryable
    FailTransient,
    /// Auth-style error; never retried
    FailPermanent,
    /// Fail the first `n` calls with a transient error, then succeed
    FailFirst(usize),
}

pub struct MockProvider {
    name: String,
    behavior: MockBehavior,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_log: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(name: &str, behavior: MockBehavior) -> Arc<Self> {
        Self::with_delay(name, behavior, Duration::ZERO)
    }

    pub fn with_delay(name: &str, behavior: MockBehavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
        })
    }

    /// Total calls made against this provider
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of every call, in start order
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    /// High-water mark of concurrent in-flight calls
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn success_result(&self, analysis_type: AnalysisType) -> AnalysisResult {
        AnalysisResult {
            provider: self.name.clone(),
            analysis_type,
            summary: "clean".to_string(),
            confidence: 0.95,
            detailed_analysis: "no findings".to_string(),
            processing_time_ms: self.delay.as_millis() as u64,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        content: &str,
        analysis_type: AnalysisType,
        _cancel: CancellationToken,
        _timeout: Duration,
    ) -> std::result::Result<AnalysisResult, ProviderError> {
        self.call_log.lock().push(content.to_string());
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Succeed => Ok(self.success_result(analysis_type)),
            MockBehavior::FailTransient => {
                Err(ProviderError::Network("simulated connection reset".to_string()))
            }
            MockBehavior::FailPermanent => {
                Err(ProviderError::Auth("simulated bad api key".to_string()))
            }
            MockBehavior::FailFirst(n) => {
                if call_index < *n {
                    Err(ProviderError::Network("simulated connection reset".to_string()))
                } else {
                    Ok(self.success_result(analysis_type))
                }
            }
        }
    }
}

/// Distributed cache tier backed by a plain map.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, AnalysisResult>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub async fn seed(&self, key: &str, value: AnalysisResult) {
        self.entries.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl DistributedCacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<AnalysisResult>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &AnalysisResult, _ttl: Duration) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Distributed cache tier that is always down.
pub struct FailingBackend;

#[async_trait]
impl DistributedCacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<AnalysisResult>> {
        Err(AnalyzerError::CacheBackend("simulated outage".to_string()))
    }

    async fn set(&self, _key: &str, _value: &AnalysisResult, _ttl: Duration) -> Result<()> {
        Err(AnalyzerError::CacheBackend("simulated outage".to_string()))
    }
}

/// Telemetry sink that stores every event for later assertions.
pub struct CollectingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl CollectingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }
}

impl TelemetrySink for CollectingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
