//! # Priority Batch Scheduler
//!
//! Accepts batches of analysis requests and executes them through the
//! failover coordinator under a strict resource model.
//!
//! ## Architecture
//!
//! - **Single shared priority queue**: ordered by `(priority, submitted_at,
//!   sequence)` - strict priority with FIFO tie-break. Requests from every
//!   batch share one queue.
//! - **Bounded dispatch**: a dispatcher task acquires an owned semaphore
//!   permit before dequeuing, so no more than `max_concurrency` requests are
//!   ever in flight. A per-batch `concurrency_override` additionally caps a
//!   single batch without affecting siblings.
//! - **Retries**: a failed request with remaining retry budget is re-enqueued
//!   after an exponential backoff delay (base * 2^retry_count, capped). The
//!   worker slot is released during the backoff sleep.
//! - **Cooperative cancellation**: `cancel_batch` flags the batch; queued
//!   requests are dropped at dequeue time, and the batch's cancellation token
//!   lets in-flight adapter calls abort early. Requests that were already
//!   started run to completion and stay in the response set.
//! - **Progress**: the `on_progress` callback fires once at submission (so
//!   callers learn the batch id) and after every terminal outcome.
//!
//! All per-request bookkeeping is keyed by request id - completions arrive
//! out of order by design.

use crate::config::SchedulerConfig;
use crate::error::{AnalyzerError, Result};
use crate::failover::FailoverCoordinator;
use crate::logging;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{BatchProgress, BatchRequest, BatchResponse, QueueStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Invoked with a fresh snapshot after every terminal outcome.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Per-submission options.
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Caller-pinned batch id; a UUIDv4 is generated when absent
    pub batch_id: Option<String>,

    pub on_progress: Option<ProgressCallback>,

    /// Cap this batch's in-flight count below the global bound
    pub concurrency_override: Option<usize>,
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_id", &self.batch_id)
            .field("on_progress", &self.on_progress.is_some())
            .field("concurrency_override", &self.concurrency_override)
            .finish()
    }
}

struct QueuedRequest {
    request: BatchRequest,
    batch_id: String,
    /// Global FIFO tie-break among equal priorities
    seq: u64,
}

impl QueuedRequest {
    fn sort_key(&self) -> (u8, chrono::DateTime<chrono::Utc>, u64) {
        (self.request.priority, self.request.submitted_at, self.seq)
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Guards the per-batch in-flight count and the requests parked when the
/// batch is at its concurrency cap.
struct BatchGate {
    in_flight: usize,
    deferred: Vec<QueuedRequest>,
}

struct BatchState {
    id: String,
    total: usize,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
    concurrency_cap: Option<usize>,
    gate: Mutex<BatchGate>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
    /// Requests not yet terminal; batch completes at zero
    outstanding: AtomicUsize,
    processing_ms_total: AtomicU64,
    responses: Mutex<Vec<BatchResponse>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl BatchState {
    fn new(id: String, total: usize, options: &BatchOptions) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            id,
            total,
            cancel: CancellationToken::new(),
            on_progress: options.on_progress.clone(),
            concurrency_cap: options.concurrency_override,
            gate: Mutex::new(BatchGate {
                in_flight: 0,
                deferred: Vec::new(),
            }),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(total),
            processing_ms_total: AtomicU64::new(0),
            responses: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
        }
    }

    fn progress_snapshot(&self) -> BatchProgress {
        let completed = self.completed.load(Ordering::Acquire);
        let average = if completed == 0 {
            0.0
        } else {
            self.processing_ms_total.load(Ordering::Acquire) as f64 / completed as f64
        };
        BatchProgress {
            batch_id: self.id.clone(),
            total_requests: self.total,
            completed_requests: completed,
            failed_requests: self.failed.load(Ordering::Acquire),
            average_processing_time_ms: average,
        }
    }

    fn report_progress(&self) {
        if let Some(callback) = &self.on_progress {
            callback(self.progress_snapshot());
        }
    }

    fn mark_terminal(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.done_tx.send_replace(true);
        }
    }
}

struct SchedulerState {
    config: SchedulerConfig,
    coordinator: Arc<FailoverCoordinator>,
    telemetry: Arc<dyn TelemetrySink>,
    queue: Mutex<BinaryHeap<Reverse<QueuedRequest>>>,
    work_available: Notify,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    dispatcher_started: AtomicBool,
    batches: DashMap<String, Arc<BatchState>>,
    next_seq: AtomicU64,
    pending: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    total_processing_ms: AtomicU64,
}

impl SchedulerState {
    fn pop_next(&self) -> Option<QueuedRequest> {
        self.queue.lock().pop().map(|Reverse(item)| item)
    }

    fn enqueue_batch(&self, items: Vec<QueuedRequest>) {
        // Count before push: the dispatcher decrements as soon as it pops
        self.pending.fetch_add(items.len(), Ordering::AcqRel);
        {
            let mut queue = self.queue.lock();
            for item in items {
                queue.push(Reverse(item));
            }
        }
        self.work_available.notify_one();
    }

    fn requeue_retry(&self, item: QueuedRequest) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push(Reverse(item));
        self.work_available.notify_one();
    }

    fn restore_deferred(&self, items: Vec<QueuedRequest>) {
        let mut queue = self.queue.lock();
        for item in items {
            queue.push(Reverse(item));
        }
        drop(queue);
        self.work_available.notify_one();
    }

    fn record_dropped(&self, batch: &BatchState, request_id: &str) {
        batch.dropped.fetch_add(1, Ordering::AcqRel);
        self.telemetry.record(TelemetryEvent::RequestDropped {
            request_id: request_id.to_string(),
        });
        batch.report_progress();
        batch.mark_terminal();
    }
}

/// Route a dequeued request: drop it if its batch was cancelled, park it if
/// the batch is at its concurrency cap, otherwise start a worker.
fn dispatch(state: &Arc<SchedulerState>, item: QueuedRequest, permit: OwnedSemaphorePermit) {
    let batch = match state.batches.get(&item.batch_id) {
        Some(entry) => Arc::clone(entry.value()),
        None => {
            // Batch record gone; nothing left to account against
            state.pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }
    };

    if batch.cancel.is_cancelled() {
        state.pending.fetch_sub(1, Ordering::AcqRel);
        debug!(
            batch_id = %batch.id,
            request_id = %item.request.id,
            "dropping queued request from cancelled batch"
        );
        state.record_dropped(&batch, &item.request.id);
        return;
    }

    if let Some(cap) = batch.concurrency_cap {
        let mut gate = batch.gate.lock();
        if gate.in_flight >= cap {
            gate.deferred.push(item);
            return;
        }
        gate.in_flight += 1;
    } else {
        batch.gate.lock().in_flight += 1;
    }

    state.pending.fetch_sub(1, Ordering::AcqRel);
    state.active.fetch_add(1, Ordering::AcqRel);

    tokio::spawn(execute_request(Arc::clone(state), batch, item, permit));
}

async fn run_dispatcher(state: Arc<SchedulerState>) {
    loop {
        let permit = tokio::select! {
            permit = state.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = state.shutdown.cancelled() => return,
        };

        let item = loop {
            let notified = state.work_available.notified();
            if let Some(item) = state.pop_next() {
                break item;
            }
            tokio::select! {
                _ = notified => {}
                _ = state.shutdown.cancelled() => return,
            }
        };

        dispatch(&state, item, permit);
    }
}

async fn execute_request(
    state: Arc<SchedulerState>,
    batch: Arc<BatchState>,
    mut item: QueuedRequest,
    permit: OwnedSemaphorePermit,
) {
    let request_id = item.request.id.clone();
    let started = Instant::now();
    let outcome = state
        .coordinator
        .analyze_with_failover(&item.request.content, item.request.analysis_type, &batch.cancel)
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    // Free the worker slot before any retry bookkeeping; backoff sleeps
    // must not hold capacity.
    drop(permit);
    state.active.fetch_sub(1, Ordering::AcqRel);

    let drained = {
        let mut gate = batch.gate.lock();
        gate.in_flight -= 1;
        std::mem::take(&mut gate.deferred)
    };
    if !drained.is_empty() {
        state.restore_deferred(drained);
    }

    match outcome {
        Ok(result) => {
            let provider = result.provider.clone();
            batch.responses.lock().push(BatchResponse {
                request_id: request_id.clone(),
                outcome: Ok(result),
                provider_used: Some(provider.clone()),
                duration_ms,
            });
            batch.completed.fetch_add(1, Ordering::AcqRel);
            batch
                .processing_ms_total
                .fetch_add(duration_ms, Ordering::AcqRel);
            state.completed.fetch_add(1, Ordering::AcqRel);
            state
                .total_processing_ms
                .fetch_add(duration_ms, Ordering::AcqRel);
            state.telemetry.record(TelemetryEvent::RequestCompleted {
                request_id,
                provider,
                duration_ms,
            });
            batch.report_progress();
            batch.mark_terminal();
        }
        Err(AnalyzerError::Cancelled(_)) => {
            // In-flight call aborted by cancellation: dropped, not failed
            state.record_dropped(&batch, &request_id);
        }
        Err(error) => {
            let retry_budget_left = item.request.retry_count < item.request.max_retries;
            if error.is_retryable() && retry_budget_left {
                let delay = backoff_delay(&state.config, item.request.retry_count);
                item.request.retry_count += 1;
                warn!(
                    batch_id = %batch.id,
                    request_id = %request_id,
                    retry_count = item.request.retry_count,
                    max_retries = item.request.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "request failed, re-enqueueing after backoff"
                );

                let state = Arc::clone(&state);
                let batch = Arc::clone(&batch);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if batch.cancel.is_cancelled() {
                        state.record_dropped(&batch, &item.request.id);
                    } else {
                        state.requeue_retry(item);
                    }
                });
                // Not terminal: the request is still outstanding
            } else {
                let reason = error.to_string();
                batch.responses.lock().push(BatchResponse {
                    request_id: request_id.clone(),
                    outcome: Err(reason.clone()),
                    provider_used: None,
                    duration_ms,
                });
                batch.failed.fetch_add(1, Ordering::AcqRel);
                state.failed.fetch_add(1, Ordering::AcqRel);
                state.telemetry.record(TelemetryEvent::RequestFailed {
                    request_id: request_id.clone(),
                    reason,
                });
                debug!(
                    batch_id = %batch.id,
                    request_id = %request_id,
                    retries_used = item.request.retry_count,
                    "request permanently failed"
                );
                batch.report_progress();
                batch.mark_terminal();
            }
        }
    }
}

/// Exponential backoff: `base * 2^retry_count`, capped at `backoff_max`.
fn backoff_delay(config: &SchedulerConfig, retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count);
    config
        .backoff_base
        .saturating_mul(factor)
        .min(config.backoff_max)
}

/// Priority-aware batch scheduler over a failover coordinator.
pub struct BatchScheduler {
    inner: Arc<SchedulerState>,
}

impl BatchScheduler {
    /// `config.max_concurrency` must be validated (> 0) by the caller;
    /// [`crate::config::AnalyzerConfig::validate`] does this.
    pub fn new(
        coordinator: Arc<FailoverCoordinator>,
        telemetry: Arc<dyn TelemetrySink>,
        config: SchedulerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            inner: Arc::new(SchedulerState {
                config,
                coordinator,
                telemetry,
                queue: Mutex::new(BinaryHeap::new()),
                work_available: Notify::new(),
                semaphore,
                shutdown: CancellationToken::new(),
                dispatcher_started: AtomicBool::new(false),
                batches: DashMap::new(),
                next_seq: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                total_processing_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a batch and wait for every request to reach a terminal state.
    /// Responses come back in submission order; requests dropped by
    /// cancellation are absent.
    pub async fn submit_batch(
        &self,
        requests: Vec<BatchRequest>,
        options: BatchOptions,
    ) -> Result<Vec<BatchResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.validate(&requests, &options)?;
        self.ensure_dispatcher();

        let batch_id = options
            .batch_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let submission_order: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();

        let batch = Arc::new(BatchState::new(batch_id.clone(), requests.len(), &options));
        // Entry API so concurrent submissions pinning the same id cannot
        // clobber each other's live batch state
        match self.inner.batches.entry(batch_id.clone()) {
            Entry::Occupied(_) => {
                return Err(AnalyzerError::Validation(format!(
                    "batch id '{batch_id}' is already active"
                )));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&batch));
            }
        }

        info!(
            batch_id = %batch_id,
            request_count = requests.len(),
            concurrency_override = ?options.concurrency_override,
            "batch submitted"
        );
        logging::log_batch_operation("submit", &batch_id, requests.len(), "accepted");
        self.inner.telemetry.record(TelemetryEvent::BatchSubmitted {
            batch_id: batch_id.clone(),
            request_count: requests.len(),
        });

        // Initial snapshot so callers learn the batch id before any
        // terminal outcome
        batch.report_progress();

        let items: Vec<QueuedRequest> = requests
            .into_iter()
            .map(|request| QueuedRequest {
                request,
                batch_id: batch_id.clone(),
                seq: self.inner.next_seq.fetch_add(1, Ordering::AcqRel),
            })
            .collect();
        self.inner.enqueue_batch(items);

        let mut done_rx = batch.done_rx.clone();
        if done_rx.wait_for(|done| *done).await.is_err() {
            warn!(batch_id = %batch_id, "batch completion channel closed unexpectedly");
        }

        self.inner.batches.remove(&batch_id);
        debug!(
            batch_id = %batch_id,
            completed = batch.completed.load(Ordering::Acquire),
            failed = batch.failed.load(Ordering::Acquire),
            dropped = batch.dropped.load(Ordering::Acquire),
            "batch reached terminal state"
        );
        logging::log_batch_operation("complete", &batch_id, batch.total, "finished");

        let mut by_id: HashMap<String, BatchResponse> = batch
            .responses
            .lock()
            .drain(..)
            .map(|response| (response.request_id.clone(), response))
            .collect();
        Ok(submission_order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect())
    }

    /// Flag a batch as cancelled. Queued requests are dropped at dequeue
    /// time; in-flight requests see the batch's cancellation token.
    pub fn cancel_batch(&self, batch_id: &str) {
        match self.inner.batches.get(batch_id) {
            Some(entry) => {
                let batch = entry.value();
                info!(batch_id = %batch_id, "batch cancellation requested");
                logging::log_batch_operation("cancel", batch_id, batch.total, "requested");
                self.inner.telemetry.record(TelemetryEvent::BatchCancelled {
                    batch_id: batch_id.to_string(),
                });
                batch.cancel.cancel();
                self.inner.work_available.notify_one();
            }
            None => {
                warn!(batch_id = %batch_id, "cancel requested for unknown or finished batch");
            }
        }
    }

    /// Scheduler-lifetime queue statistics
    pub fn queue_status(&self) -> QueueStatus {
        let completed = self.inner.completed.load(Ordering::Acquire);
        let average = if completed == 0 {
            0.0
        } else {
            self.inner.total_processing_ms.load(Ordering::Acquire) as f64 / completed as f64
        };
        QueueStatus {
            pending_requests: self.inner.pending.load(Ordering::Acquire),
            active_requests: self.inner.active.load(Ordering::Acquire),
            completed_requests: completed,
            failed_requests: self.inner.failed.load(Ordering::Acquire),
            average_processing_time_ms: average,
        }
    }

    /// Stop the dispatcher. In-flight requests finish; queued requests are
    /// no longer dispatched.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn ensure_dispatcher(&self) {
        if !self.inner.dispatcher_started.swap(true, Ordering::AcqRel) {
            tokio::spawn(run_dispatcher(Arc::clone(&self.inner)));
        }
    }

    fn validate(&self, requests: &[BatchRequest], options: &BatchOptions) -> Result<()> {
        if options.concurrency_override == Some(0) {
            return Err(AnalyzerError::Validation(
                "concurrency_override must be greater than 0".to_string(),
            ));
        }

        if let Some(batch_id) = &options.batch_id {
            if self.inner.batches.contains_key(batch_id) {
                return Err(AnalyzerError::Validation(format!(
                    "batch id '{batch_id}' is already active"
                )));
            }
        }

        let mut seen = HashSet::with_capacity(requests.len());
        for request in requests {
            if request.id.is_empty() {
                return Err(AnalyzerError::Validation(
                    "request id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(request.id.as_str()) {
                return Err(AnalyzerError::Validation(format!(
                    "duplicate request id '{}' in batch",
                    request.id
                )));
            }
            if request.retry_count > request.max_retries {
                return Err(AnalyzerError::Validation(format!(
                    "request '{}' has retry_count {} above max_retries {}",
                    request.id, request.retry_count, request.max_retries
                )));
            }
        }
        Ok(())
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
