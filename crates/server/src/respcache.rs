//! Response cache for configured read-only upstream paths.
//!
//! A small LRU with per-entry TTL keyed by (method, full URL including
//! query). Entries expire lazily on access.

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 100;

/// A cached upstream response.
#[derive(Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    expires_at: Instant,
}

/// LRU + TTL cache for idempotent upstream GETs.
pub struct ResponseCache {
    entries: Mutex<LruCache<(Method, String), CachedResponse>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fresh cached response for the key, if any. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, method: &Method, url: &str) -> Option<CachedResponse> {
        let key = (method.clone(), url.to_string());
        let mut entries = self.entries.lock();
        let expired = match entries.get(&key) {
            Some(cached) if cached.expires_at > Instant::now() => return Some(cached.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
        }
        None
    }

    /// Store a response under the key for `ttl`.
    pub fn put(
        &self,
        method: Method,
        url: String,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        ttl: Duration,
    ) {
        let cached = CachedResponse {
            status,
            headers,
            body,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().put((method, url), cached);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
