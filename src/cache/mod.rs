//! # Result Cache
//!
//! Content-addressed, tiered cache for analysis results.
//!
//! ## Architecture
//!
//! - **Local tier**: bounded LRU (byte budget and entry budget, whichever
//!   trips first) with lazy TTL expiry.
//! - **Distributed tier**: optional, behind [`DistributedCacheBackend`].
//!   Reads check local first; a distributed hit is promoted into the local
//!   tier. Writes go to both tiers. Any distributed failure degrades to
//!   local-only operation - logged, never fatal.
//!
//! Keys are SHA-256 over `(content, analysis_type, params_signature)`, so
//! identical requests reuse results regardless of which provider produced
//! them.

mod local;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::types::{AnalysisResult, AnalysisType};
use async_trait::async_trait;
use local::LocalCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Deterministic cache key for a request.
pub fn cache_key(content: &str, analysis_type: AnalysisType, params_signature: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(analysis_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(params_signature.as_bytes());
    hex::encode(hasher.finalize())
}

/// Optional second cache tier (e.g. Redis, a shared service). Failures must
/// be surfaced as errors so the core can degrade gracefully; panicking
/// backends are not supported.
#[async_trait]
pub trait DistributedCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AnalysisResult>>;
    async fn set(&self, key: &str, value: &AnalysisResult, ttl: Duration) -> Result<()>;
}

/// Lifetime cache counters plus current occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size_bytes: u64,
    pub entry_count: usize,
}

/// Tiered result cache: bounded local LRU over an optional distributed
/// backend.
pub struct ResultCache {
    local: Mutex<LocalCache>,
    distributed: Option<Arc<dyn DistributedCacheBackend>>,
    promote_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: Mutex::new(LocalCache::new(config.max_bytes, config.max_entries)),
            distributed: None,
            promote_ttl: config.default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_backend(config: CacheConfig, backend: Arc<dyn DistributedCacheBackend>) -> Self {
        let mut cache = Self::new(config);
        cache.distributed = Some(backend);
        cache
    }

    /// Lookup across both tiers. A distributed hit is promoted into the
    /// local tier before returning.
    pub async fn get(&self, key: &str) -> Option<AnalysisResult> {
        if let Some(value) = self.local.lock().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "local cache hit");
            return Some(value);
        }

        if let Some(backend) = &self.distributed {
            match backend.get(key).await {
                Ok(Some(value)) => {
                    self.local
                        .lock()
                        .insert(key.to_string(), value.clone(), self.promote_ttl);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "distributed cache hit, promoted to local tier");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "distributed cache read failed, serving local tier only");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write-through to both tiers. A distributed write failure leaves the
    /// local tier updated and is not surfaced to the caller.
    pub async fn set(&self, key: &str, value: AnalysisResult, ttl: Duration) {
        self.local
            .lock()
            .insert(key.to_string(), value.clone(), ttl);

        if let Some(backend) = &self.distributed {
            if let Err(e) = backend.set(key, &value, ttl).await {
                warn!(key = %key, error = %e, "distributed cache write failed, entry kept in local tier");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: local.evictions(),
            current_size_bytes: local.current_bytes() as u64,
            entry_count: local.entry_count(),
        }
    }

    /// Drop every local-tier entry. Lifetime hit/miss counters survive; the
    /// distributed tier ages out via TTL.
    pub fn clear(&self) {
        self.local.lock().clear();
    }
}
