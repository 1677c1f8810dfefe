//! In-memory response cache for composite fan-outs.
//!
//! Keys are a fingerprint of method, URL, and the Accept / Accept-Encoding
//! request headers. Only `GET` responses with status 200 are admitted, and
//! an entry TTL of zero disables insertion entirely. Expiry is lazy: an
//! expired entry is dropped on the lookup that finds it.

use actix_web::web::Bytes;
use ahash::HashMap as AHashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Builds the cache key from the request line and the fixed header subset.
pub fn fingerprint(method: &str, url: &str, accept: &str, accept_encoding: &str) -> String {
    format!("{}|{}|{}|{}", method, url, accept, accept_encoding)
}

/// A cached upstream response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    /// Header name/value pairs preserved byte-exact.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Bounded TTL cache shared by all composite handlers.
///
/// Reads take the shared lock; the write lock is held only for insert and
/// for dropping an expired entry.
pub struct ResponseCache {
    entries: RwLock<AHashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(AHashMap::default()),
        }
    }

    /// Returns a live entry, dropping it first when expired.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if !entry.expired() => return Some(entry.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.write().unwrap().remove(key);
        }
        None
    }

    /// Admits a response when it qualifies: GET, status 200, non-zero TTL.
    pub fn insert(
        &self,
        key: String,
        method: &str,
        status: u16,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
        ttl: Duration,
    ) {
        if method != "GET" || status != 200 || ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            status,
            headers,
            body,
            inserted_at: Instant::now(),
            ttl,
        };
        self.entries.write().unwrap().insert(key, entry);
    }

    /// Drops every entry; called at shutdown.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        fingerprint("GET", "/api/combined", "application/json", "gzip")
    }

    #[test]
    fn only_get_200_is_admitted() {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);

        cache.insert(key(), "POST", 200, vec![], Bytes::from_static(b"x"), ttl);
        cache.insert(key(), "GET", 404, vec![], Bytes::from_static(b"x"), ttl);
        assert!(cache.is_empty());

        cache.insert(key(), "GET", 200, vec![], Bytes::from_static(b"x"), ttl);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_disables_insertion() {
        let cache = ResponseCache::new();
        cache.insert(
            key(),
            "GET",
            200,
            vec![],
            Bytes::from_static(b"x"),
            Duration::ZERO,
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_dropped_on_lookup() {
        let cache = ResponseCache::new();
        cache.insert(
            key(),
            "GET",
            200,
            vec![],
            Bytes::from_static(b"x"),
            Duration::from_millis(1),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn fingerprint_varies_with_header_subset() {
        let a = fingerprint("GET", "/x", "application/json", "gzip");
        let b = fingerprint("GET", "/x", "text/html", "gzip");
        let c = fingerprint("GET", "/x", "application/json", "br");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
