//! Response cache with TTL and lazy eviction.

use crate::Response;
use http::Method;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Deterministic cache key: method, normalized path, sorted query params.
///
/// Two logically identical requests collide on the same key regardless of
/// query parameter order or a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
}

impl CacheKey {
    /// Derive the key for a method and resolved URL.
    pub fn new(method: &Method, url: &Url) -> Self {
        let path = normalize_path(url.path());
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        let mut key = format!("{method} {path}");
        for (i, (k, v)) in pairs.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }

        Self { key }
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

fn normalize_path(path: &str) -> String {
    if path.len() > 1 && path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

struct CacheEntry {
    value: Response,
    expires_at: Instant,
}

/// In-memory response cache.
///
/// Reads and writes are immediate (no suspension), so concurrent requests
/// cannot interleave around them. Expired entries are treated as absent and
/// evicted lazily on the next lookup.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a cache with the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Look up a live entry. Returns `None` for missing or expired keys.
    pub fn get(&self, key: &CacheKey) -> Option<Response> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key.as_str()) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().remove(key.as_str());
            debug!(key = key.as_str(), "evicted expired cache entry");
        }
        None
    }

    /// Store a response under the key, with an optional per-entry TTL.
    pub fn put(&self, key: &CacheKey, value: Response, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.as_str().to_string(), entry);
    }

    /// Remove entries whose key matches the predicate. Returns the count.
    pub fn invalidate(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Invalidate cached reads affected by a mutation of `path`.
    ///
    /// Covers the resource's own read path and any ancestor collection
    /// path, so `PUT /projects/42` drops both `GET /projects/42` and
    /// `GET /projects`.
    pub fn invalidate_resource(&self, path: &str) -> usize {
        let path = normalize_path(path);
        let removed = self.invalidate(|key| {
            let entry_path = match key.split(' ').nth(1) {
                Some(rest) => rest.split('?').next().unwrap_or(rest),
                None => return false,
            };
            entry_path == path || path.starts_with(&format!("{entry_path}/"))
        });
        if removed > 0 {
            debug!(path = %path, removed, "invalidated cached reads for mutated resource");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
