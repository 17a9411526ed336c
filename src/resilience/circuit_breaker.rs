//! # Circuit Breaker Implementation
//!
//! Provides fault isolation so a failing provider cannot drag down every
//! request that could be served elsewhere. This implementation follows the
//! classic circuit breaker pattern with three states: Closed (normal
//! operation), Open (failing fast), and Half-Open (testing recovery).
//!
//! The gate is split into `allow_request()` / `record_success()` /
//! `record_failure()` so the failover coordinator decides *whether* to call a
//! provider before building the call, and a Half-Open circuit admits exactly
//! one concurrent trial call.

use crate::resilience::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Point-in-time health snapshot for one provider's circuit.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

struct OpenedAt {
    instant: Instant,
    wall: DateTime<Utc>,
}

/// Core circuit breaker with atomic state management
pub struct CircuitBreaker {
    /// Provider this circuit guards, for logging and health snapshots
    provider_id: String,

    config: CircuitBreakerConfig,

    /// Current circuit state (atomic for lock-free reads)
    state: AtomicU8,

    consecutive_failures: AtomicU32,

    /// Set while the single Half-Open trial call is in flight
    trial_in_flight: AtomicBool,

    /// When the circuit was opened, for cooldown evaluation
    opened: Mutex<Option<OpenedAt>>,
}

impl CircuitBreaker {
    pub fn new(provider_id: String, config: CircuitBreakerConfig) -> Self {
        debug!(
            provider = %provider_id,
            failure_threshold = config.failure_threshold,
            cooldown_secs = config.cooldown.as_secs(),
            "🛡️ Circuit breaker initialized"
        );

        Self {
            provider_id,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            trial_in_flight: AtomicBool::new(false),
            opened: Mutex::new(None),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Non-blocking gate check. Evaluates the Open -> HalfOpen cooldown
    /// transition lazily; when it fires, the caller owns the trial slot.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.claim_trial_slot(),
            CircuitState::Open => {
                let opened = self.opened.lock();
                // Re-check under the lock: a concurrent caller may have
                // already moved the circuit to Half-Open.
                match self.state() {
                    CircuitState::Closed => true,
                    CircuitState::HalfOpen => self.claim_trial_slot(),
                    CircuitState::Open => match *opened {
                        Some(ref at) if at.instant.elapsed() >= self.config.cooldown => {
                            self.trial_in_flight.store(true, Ordering::Release);
                            self.state
                                .store(CircuitState::HalfOpen as u8, Ordering::Release);
                            info!(
                                provider = %self.provider_id,
                                "🟡 Circuit breaker half-open (testing recovery)"
                            );
                            true
                        }
                        Some(_) => false,
                        None => {
                            warn!(
                                provider = %self.provider_id,
                                "Circuit open but no timestamp recorded"
                            );
                            true
                        }
                    },
                }
            }
        }
    }

    fn claim_trial_slot(&self) -> bool {
        !self.trial_in_flight.swap(true, Ordering::AcqRel)
    }

    /// Record a successful provider call
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.transition_to_closed();
            }
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {
                warn!(
                    provider = %self.provider_id,
                    "Success recorded while circuit is open"
                );
            }
        }
    }

    /// Record a failed or timed-out provider call
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open(failures);
                }
            }
            CircuitState::HalfOpen => {
                // Trial failed; cooldown restarts
                let failures = self.consecutive_failures.load(Ordering::Acquire);
                self.transition_to_open(failures);
            }
            CircuitState::Open => {
                // Already open, nothing to record
            }
        }
    }

    /// Release an unused Half-Open trial slot. For callers whose gated call
    /// never reached a recordable outcome (e.g. it was cancelled mid-flight);
    /// without this the trial slot would stay claimed forever.
    pub fn release_trial(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.trial_in_flight.store(false, Ordering::Release);
        }
    }

    /// Force the circuit closed (operator recovery path)
    pub fn reset(&self) {
        warn!(provider = %self.provider_id, "🚨 Circuit breaker manually reset");
        self.transition_to_closed();
    }

    /// Current health snapshot
    pub fn health(&self) -> ProviderHealth {
        let opened = self.opened.lock();
        let (opened_at, cooldown_until) = match *opened {
            Some(ref at) => {
                let cooldown = chrono::Duration::from_std(self.config.cooldown)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                (Some(at.wall), Some(at.wall + cooldown))
            }
            None => (None, None),
        };

        ProviderHealth {
            provider_id: self.provider_id.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            opened_at,
            cooldown_until,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn transition_to_open(&self, failures: u32) {
        let mut opened = self.opened.lock();
        *opened = Some(OpenedAt {
            instant: Instant::now(),
            wall: Utc::now(),
        });
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        error!(
            provider = %self.provider_id,
            consecutive_failures = failures,
            cooldown_secs = self.config.cooldown.as_secs(),
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_closed(&self) {
        let mut opened = self.opened.lock();
        *opened = None;
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        info!(
            provider = %self.provider_id,
            "🟢 Circuit breaker closed (recovered)"
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider_id", &self.provider_id)
            .field("state", &self.state())
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Acquire),
            )
            .finish()
    }
}

/// Lazily creates and hands out one breaker per provider id, all sharing the
/// same settings. Owned by the failover coordinator rather than living in a
/// process-wide registry.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker guarding `provider_id`
    pub fn breaker_for(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider_id.to_string(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Health snapshots for every registered breaker, ordered by provider id
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let mut health: Vec<ProviderHealth> = self
            .breakers
            .iter()
            .map(|entry| entry.value().health())
            .collect();
        health.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        health
    }
}
