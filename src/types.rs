//! Shared data model for the orchestration core.
//!
//! These types cross the public API boundary: batch submission, per-request
//! responses, progress reporting, and queue introspection. All of them are
//! serde-serializable so the embedding application can ship them to a UI or
//! log pipeline unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default retry budget applied by [`BatchRequest::new`].
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Kind of analysis a provider is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Deobfuscate,
    Vulnerabilities,
    Malware,
    CodeReview,
    General,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Deobfuscate => "deobfuscate",
            AnalysisType::Vulnerabilities => "vulnerabilities",
            AnalysisType::Malware => "malware",
            AnalysisType::CodeReview => "code_review",
            AnalysisType::General => "general",
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result produced by a provider adapter. Opaque to the scheduler; the core
/// only routes and caches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Provider that produced the result
    pub provider: String,

    /// Analysis the provider performed
    pub analysis_type: AnalysisType,

    /// One-line verdict
    pub summary: String,

    /// Provider confidence in the verdict (0.0 - 1.0)
    pub confidence: f32,

    /// Full analysis text
    pub detailed_analysis: String,

    /// Provider-side processing time
    pub processing_time_ms: u64,
}

/// A single request within a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Unique within its batch
    pub id: String,

    /// Content to analyze
    pub content: String,

    pub analysis_type: AnalysisType,

    /// 0 = highest priority
    pub priority: u8,

    pub submitted_at: DateTime<Utc>,

    /// Attempts consumed so far; always <= max_retries
    pub retry_count: u32,

    pub max_retries: u32,
}

impl BatchRequest {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        analysis_type: AnalysisType,
        priority: u8,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            analysis_type,
            priority,
            submitted_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Terminal outcome for one request of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub request_id: String,

    /// Exactly one of result/error, modeled as `Result`
    pub outcome: std::result::Result<AnalysisResult, String>,

    /// Provider that served the request, when one did
    pub provider_used: Option<String>,

    /// Wall-clock time from dequeue to terminal outcome for this attempt
    pub duration_ms: u64,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Progress snapshot delivered to the `on_progress` callback.
///
/// Completed/failed counts are monotonically non-decreasing within a batch
/// lifecycle. The average covers completed (non-cancelled) requests only and
/// reports `0.0` before the first completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub total_requests: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    pub average_processing_time_ms: f64,
}

/// Scheduler-lifetime queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Requests enqueued but not yet started
    pub pending_requests: usize,

    /// Requests currently in flight
    pub active_requests: usize,

    pub completed_requests: u64,
    pub failed_requests: u64,

    /// Running mean over completed requests; 0.0 before the first completion
    pub average_processing_time_ms: f64,
}
