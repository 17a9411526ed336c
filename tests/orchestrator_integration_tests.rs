//! End-to-end tests for the orchestration core: priority scheduling,
//! concurrency bounds, circuit-breaker failover, cancellation, retry
//! exhaustion, and cache behavior across tiers.

mod common;

use analyzer_core::cache::cache_key;
use analyzer_core::config::AnalyzerConfig;
use analyzer_core::error::AnalyzerError;
use analyzer_core::orchestrator::AnalysisOrchestrator;
use analyzer_core::providers::ProviderAdapter;
use analyzer_core::resilience::CircuitState;
use analyzer_core::scheduler::BatchOptions;
use analyzer_core::telemetry::TelemetryEvent;
use analyzer_core::types::{AnalysisType, BatchProgress, BatchRequest};
use common::{
    CollectingTelemetry, FailingBackend, MemoryBackend, MockBehavior, MockProvider,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn test_config(max_concurrency: usize) -> AnalyzerConfig {
    let mut config = AnalyzerConfig::default();
    config.scheduler.max_concurrency = max_concurrency;
    config.scheduler.backoff_base = Duration::from_millis(10);
    config.scheduler.backoff_max = Duration::from_millis(40);
    config.failover.call_timeout = Duration::from_secs(2);
    config
}

fn orchestrator_with(
    providers: Vec<Arc<dyn ProviderAdapter>>,
    max_concurrency: usize,
) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(providers, test_config(max_concurrency)).unwrap()
}

#[tokio::test]
async fn test_empty_batch_returns_immediately() {
    analyzer_core::logging::init_structured_logging();
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider], 2);

    let responses = orchestrator
        .submit_batch(Vec::new(), BatchOptions::default())
        .await
        .unwrap();
    assert!(responses.is_empty());
    assert_eq!(orchestrator.queue_status().completed_requests, 0);
}

#[tokio::test]
async fn test_duplicate_request_ids_rejected_before_enqueue() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider.clone()], 2);

    let requests = vec![
        BatchRequest::new("req-1", "a", AnalysisType::Malware, 0),
        BatchRequest::new("req-1", "b", AnalysisType::Malware, 0),
    ];
    let error = orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, AnalyzerError::Validation(_)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_zero_concurrency_override_rejected() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider], 2);

    let options = BatchOptions {
        concurrency_override: Some(0),
        ..BatchOptions::default()
    };
    let error = orchestrator
        .submit_batch(
            vec![BatchRequest::new("req-1", "a", AnalysisType::Malware, 0)],
            options,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, AnalyzerError::Validation(_)));
}

/// Scenario A: priorities [2,0,1,0,2] with a single worker start in strict
/// priority order, FIFO among equal priorities.
#[tokio::test]
async fn test_priority_start_order_with_single_worker() {
    let provider =
        MockProvider::with_delay("solo", MockBehavior::Succeed, Duration::from_millis(10));
    let orchestrator = orchestrator_with(vec![provider.clone()], 1);

    let priorities = [2u8, 0, 1, 0, 2];
    let requests: Vec<BatchRequest> = priorities
        .iter()
        .enumerate()
        .map(|(index, &priority)| {
            let id = format!("req{}", index + 1);
            BatchRequest::new(id.clone(), id, AnalysisType::General, priority)
        })
        .collect();

    let responses = orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 5);
    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(
        provider.call_log(),
        vec!["req2", "req4", "req3", "req1", "req5"]
    );
}

#[tokio::test]
async fn test_concurrency_bound_is_never_exceeded() {
    let provider =
        MockProvider::with_delay("solo", MockBehavior::Succeed, Duration::from_millis(30));
    let orchestrator = orchestrator_with(vec![provider.clone()], 3);

    let requests: Vec<BatchRequest> = (0..20)
        .map(|i| BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0))
        .collect();

    let responses = orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 20);
    assert!(provider.max_in_flight() <= 3);
}

#[tokio::test]
async fn test_concurrency_override_caps_a_single_batch() {
    let provider =
        MockProvider::with_delay("solo", MockBehavior::Succeed, Duration::from_millis(20));
    let orchestrator = orchestrator_with(vec![provider.clone()], 4);

    let requests: Vec<BatchRequest> = (0..8)
        .map(|i| BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0))
        .collect();
    let options = BatchOptions {
        concurrency_override: Some(1),
        ..BatchOptions::default()
    };

    let responses = orchestrator.submit_batch(requests, options).await.unwrap();

    assert_eq!(responses.len(), 8);
    assert_eq!(provider.max_in_flight(), 1);
}

/// Scenario B: five consecutive failures open the breaker; the sixth request
/// skips the provider without a network call and fails over.
#[tokio::test]
async fn test_breaker_opens_and_requests_fail_over() {
    let flaky = MockProvider::new("flaky", MockBehavior::FailTransient);
    let stable = MockProvider::new("stable", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![flaky.clone(), stable.clone()], 2);

    for i in 0..5 {
        let result = orchestrator
            .analyze_with_failover(&format!("content{i}"), AnalysisType::Malware)
            .await
            .unwrap();
        assert_eq!(result.provider, "stable");
    }
    assert_eq!(flaky.calls(), 5);

    let health = orchestrator.provider_health();
    let flaky_health = health.iter().find(|h| h.provider_id == "flaky").unwrap();
    assert_eq!(flaky_health.state, CircuitState::Open);
    assert_eq!(flaky_health.consecutive_failures, 5);

    // Sixth request: breaker rejects flaky without a call
    let result = orchestrator
        .analyze_with_failover("content5", AnalysisType::Malware)
        .await
        .unwrap();
    assert_eq!(result.provider, "stable");
    assert_eq!(flaky.calls(), 5);
    assert_eq!(stable.calls(), 6);
}

/// A cache hit never reaches a provider or mutates breaker state, and an
/// identical request inside the TTL window reuses the cached value.
#[tokio::test]
async fn test_cache_hit_short_circuits_providers_and_breakers() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider.clone()], 2);

    let first = orchestrator
        .analyze_with_failover("let x = 1;", AnalysisType::CodeReview)
        .await
        .unwrap();
    let second = orchestrator
        .analyze_with_failover("let x = 1;", AnalysisType::CodeReview)
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(first, second);

    let stats = orchestrator.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    let health = orchestrator.provider_health();
    assert_eq!(health[0].consecutive_failures, 0);
    assert_eq!(health[0].state, CircuitState::Closed);
}

#[tokio::test]
async fn test_clear_cache_forces_fresh_provider_call() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider.clone()], 2);

    orchestrator
        .analyze_with_failover("content", AnalysisType::General)
        .await
        .unwrap();
    orchestrator.clear_cache();
    orchestrator
        .analyze_with_failover("content", AnalysisType::General)
        .await
        .unwrap();

    assert_eq!(provider.calls(), 2);
}

/// Scenario C: cancelling after two of ten requests started yields exactly
/// those two responses; the rest are dropped without execution.
#[tokio::test]
async fn test_cancel_batch_drops_not_yet_started_requests() {
    let provider =
        MockProvider::with_delay("slow", MockBehavior::Succeed, Duration::from_millis(400));
    let orchestrator = Arc::new(orchestrator_with(vec![provider.clone()], 2));

    let requests: Vec<BatchRequest> = (1..=10)
        .map(|i| {
            BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0)
                .with_max_retries(0)
        })
        .collect();
    let options = BatchOptions {
        batch_id: Some("batch-c".to_string()),
        ..BatchOptions::default()
    };

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit_batch(requests, options).await })
    };

    // Two workers pick up req1 and req2 and sit in the 400ms provider call
    sleep(Duration::from_millis(150)).await;
    orchestrator.cancel_batch("batch-c");

    let responses = handle.await.unwrap().unwrap();
    assert_eq!(responses.len(), 2);
    let mut ids: Vec<&str> = responses.iter().map(|r| r.request_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["req1", "req2"]);
    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(provider.calls(), 2);
}

/// Scenario D: a request with maxRetries = 2 is attempted exactly three
/// times, then reported as permanently failed.
#[tokio::test]
async fn test_retry_exhaustion_reports_permanent_failure() {
    let flaky = MockProvider::new("flaky", MockBehavior::FailTransient);
    let orchestrator = orchestrator_with(vec![flaky.clone()], 1);

    let request =
        BatchRequest::new("req-1", "content", AnalysisType::Malware, 0).with_max_retries(2);
    let responses = orchestrator
        .submit_batch(vec![request], BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert!(!responses[0].is_success());
    let reason = responses[0].outcome.as_ref().unwrap_err();
    assert!(reason.contains("all providers"));
    assert_eq!(flaky.calls(), 3);
    assert_eq!(orchestrator.queue_status().failed_requests, 1);
}

#[tokio::test]
async fn test_retries_recover_a_transient_failure() {
    let flaky = MockProvider::new("flaky", MockBehavior::FailFirst(1));
    let orchestrator = orchestrator_with(vec![flaky.clone()], 1);

    let request =
        BatchRequest::new("req-1", "content", AnalysisType::Malware, 0).with_max_retries(2);
    let responses = orchestrator
        .submit_batch(vec![request], BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert!(responses[0].is_success());
    assert_eq!(flaky.calls(), 2);
    assert_eq!(orchestrator.queue_status().failed_requests, 0);
}

#[tokio::test]
async fn test_permanent_provider_error_is_not_retried() {
    let broken = MockProvider::new("broken", MockBehavior::FailPermanent);
    let orchestrator = orchestrator_with(vec![broken.clone()], 1);

    let request =
        BatchRequest::new("req-1", "content", AnalysisType::Malware, 0).with_max_retries(2);
    let responses = orchestrator
        .submit_batch(vec![request], BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert!(!responses[0].is_success());
    // Retry budget untouched: the auth failure is permanent
    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn test_progress_accounting_reaches_total() {
    let provider = MockProvider::new("solo", MockBehavior::FailFirst(2));
    let orchestrator = orchestrator_with(vec![provider], 1);

    let snapshots: Arc<Mutex<Vec<BatchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&snapshots);
    let options = BatchOptions {
        on_progress: Some(Arc::new(move |progress| sink.lock().push(progress))),
        ..BatchOptions::default()
    };

    let requests: Vec<BatchRequest> = (0..6)
        .map(|i| {
            BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0)
                .with_max_retries(0)
        })
        .collect();
    let responses = orchestrator.submit_batch(requests, options).await.unwrap();
    assert_eq!(responses.len(), 6);

    let snapshots = snapshots.lock();
    // Initial submission snapshot plus one per terminal outcome
    assert_eq!(snapshots.len(), 7);
    assert_eq!(snapshots[0].completed_requests, 0);
    assert_eq!(snapshots[0].failed_requests, 0);

    let last = snapshots.last().unwrap();
    assert_eq!(last.total_requests, 6);
    assert_eq!(last.completed_requests + last.failed_requests, 6);
    assert_eq!(last.failed_requests, 2);
    assert!(last.average_processing_time_ms >= 0.0);

    // Counts never decrease across snapshots
    for window in snapshots.windows(2) {
        assert!(window[1].completed_requests >= window[0].completed_requests);
        assert!(window[1].failed_requests >= window[0].failed_requests);
    }
}

#[tokio::test]
async fn test_distributed_tier_failure_degrades_to_local_only() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = AnalysisOrchestrator::builder()
        .provider(provider.clone())
        .distributed_cache(Arc::new(FailingBackend))
        .config(test_config(2))
        .build()
        .unwrap();

    orchestrator
        .analyze_with_failover("content", AnalysisType::General)
        .await
        .unwrap();
    // Second identical request is served from the local tier despite the
    // distributed tier being down
    orchestrator
        .analyze_with_failover("content", AnalysisType::General)
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(orchestrator.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_distributed_hit_is_promoted_and_skips_providers() {
    let provider = MockProvider::new("local-provider", MockBehavior::Succeed);
    let backend = MemoryBackend::new();

    let config = test_config(2);
    let seeded = cache_key("content", AnalysisType::Malware, &config.failover.params_signature);
    backend
        .seed(
            &seeded,
            provider.success_result(AnalysisType::Malware),
        )
        .await;

    let orchestrator = AnalysisOrchestrator::builder()
        .provider(provider.clone())
        .distributed_cache(backend)
        .config(config)
        .build()
        .unwrap();

    let result = orchestrator
        .analyze_with_failover("content", AnalysisType::Malware)
        .await
        .unwrap();

    assert_eq!(provider.calls(), 0);
    assert_eq!(result.provider, "local-provider");
    // Promoted into the local tier on the way through
    assert_eq!(orchestrator.cache_stats().entry_count, 1);
}

#[tokio::test]
async fn test_telemetry_covers_batch_lifecycle() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let telemetry = CollectingTelemetry::new();
    let orchestrator = AnalysisOrchestrator::builder()
        .provider(provider)
        .telemetry(telemetry.clone())
        .config(test_config(2))
        .build()
        .unwrap();

    let requests = vec![BatchRequest::new("req-1", "content", AnalysisType::General, 0)];
    orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap();

    let events = telemetry.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::BatchSubmitted { request_count: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::CacheMiss { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::RequestCompleted { request_id, .. } if request_id == "req-1")));
}

#[tokio::test]
async fn test_queue_status_tracks_lifetime_counters() {
    let provider =
        MockProvider::with_delay("solo", MockBehavior::Succeed, Duration::from_millis(10));
    let orchestrator = orchestrator_with(vec![provider], 2);

    let fresh = orchestrator.queue_status();
    assert_eq!(fresh.completed_requests, 0);
    assert_eq!(fresh.average_processing_time_ms, 0.0);

    let requests: Vec<BatchRequest> = (0..4)
        .map(|i| BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0))
        .collect();
    orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap();

    let status = orchestrator.queue_status();
    assert_eq!(status.completed_requests, 4);
    assert_eq!(status.failed_requests, 0);
    assert_eq!(status.pending_requests, 0);
    assert_eq!(status.active_requests, 0);
    assert!(status.average_processing_time_ms > 0.0);
}

#[tokio::test]
async fn test_per_request_failures_do_not_abort_siblings() {
    // Primary rejects everything permanently; secondary rescues every call
    let broken = MockProvider::new("broken", MockBehavior::FailPermanent);
    let stable = MockProvider::new("stable", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![broken, stable], 2);

    let requests: Vec<BatchRequest> = (0..5)
        .map(|i| BatchRequest::new(format!("req{i}"), format!("content{i}"), AnalysisType::General, 0))
        .collect();
    let responses = orchestrator
        .submit_batch(requests, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 5);
    assert!(responses.iter().all(|r| r.is_success()));
    assert!(responses
        .iter()
        .all(|r| r.provider_used.as_deref() == Some("stable")));
}

#[tokio::test]
async fn test_probe_providers_reports_health_checks() {
    let provider = MockProvider::new("solo", MockBehavior::Succeed);
    let orchestrator = orchestrator_with(vec![provider], 2);

    let probes = orchestrator.probe_providers().await;
    assert_eq!(probes, vec![("solo".to_string(), true)]);
}
