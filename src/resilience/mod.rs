//! # Resilience Module
//!
//! Fault isolation for provider calls. Each provider gets its own circuit
//! breaker so repeated failures stop burning requests (and budget) on a
//! provider that is down, while healthy providers keep serving.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: Closed / Open / Half-Open state machine per provider
//! - **Registry**: lazily creates one breaker per provider id with shared settings
//! - **Health Snapshots**: `ProviderHealth` for introspection and UI surfaces
//!
//! ## Usage
//!
//! ```rust
//! use analyzer_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     cooldown: Duration::from_secs(30),
//! };
//!
//! let circuit = CircuitBreaker::new("claude".to_string(), config);
//!
//! if circuit.allow_request() {
//!     // ... call the provider ...
//!     circuit.record_success();
//! }
//! ```

pub mod circuit_breaker;
pub mod config;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, ProviderHealth};
pub use config::CircuitBreakerConfig;
