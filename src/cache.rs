//! Final-result cache keyed by query fingerprint.
//!
//! Only quick-mode results are cacheable. The gateway treats every probe
//! error as a miss and stores fire-and-forget, so a broken cache can slow
//! answers down but never break them. The shipped backend is an in-process
//! TTL map; the trait boundary leaves room for an external backend.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::Mode;
use crate::events::FinalPayload;

/// Errors from a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend is unreachable or corrupted.
    #[error("cache backend unavailable: {message}")]
    Backend {
        /// Diagnostic detail.
        message: String,
    },
}

/// Cache of final payloads.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Looks up a prior result. Expired entries are misses.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the backend cannot answer; callers must
    /// treat that as a miss.
    async fn probe(&self, key: &str) -> Result<Option<FinalPayload>, CacheError>;

    /// Stores a result under the key with a time-to-live.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on backend failure; callers fire-and-forget.
    async fn store(&self, key: &str, payload: FinalPayload, ttl: Duration)
    -> Result<(), CacheError>;
}

/// Normalizes a query for fingerprinting: control characters stripped,
/// whitespace collapsed to single spaces, lower-cased, trimmed.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut pending_space = false;
    for c in query.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in c.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Fingerprints `(normalized query, mode)` as a hex SHA-256 digest.
#[must_use]
pub fn fingerprint(query: &str, mode: Mode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update([0u8]);
    hasher.update(mode.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

struct Entry {
    payload: FinalPayload,
    expires_at: Instant,
}

/// In-process TTL cache.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("MemoryCache").field("entries", &len).finish()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn probe(&self, key: &str) -> Result<Option<FinalPayload>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Backend {
            message: "cache lock poisoned".to_string(),
        })?;

        let now = Instant::now();
        let fresh = entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.payload.clone());
        if fresh.is_none() {
            entries.remove(key);
        }
        Ok(fresh)
    }

    async fn store(
        &self,
        key: &str,
        payload: FinalPayload,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Backend {
            message: "cache lock poisoned".to_string(),
        })?;

        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                payload,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}
