//! Atomic metrics collection for the JSON metrics endpoint.
//!
//! All counters use relaxed atomics; the per-backend map is populated at
//! init (and on tenant registration) so the request path only ever reads it.

use ahash::HashMap as AHashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Per-backend request statistics.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl BackendMetrics {
    pub fn record(&self, success: bool, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let ms = latency.as_millis() as u64;
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn summary(&self) -> (u64, u64, u64, u64) {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let sum = self.latency_sum_ms.load(Ordering::Relaxed);
        let max = self.latency_max_ms.load(Ordering::Relaxed);
        (requests, errors, if requests > 0 { sum / requests } else { 0 }, max)
    }
}

/// Gateway-wide metrics: totals plus composite / circuit-breaker /
/// health-check counters surfaced by the metrics endpoint.
pub struct GatewayMetrics {
    backends: RwLock<AHashMap<String, Arc<BackendMetrics>>>,
    pub total_requests: AtomicU64,
    pub composite_requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub circuit_open_transitions: AtomicU64,
    pub circuit_short_circuits: AtomicU64,
    pub health_probes: AtomicU64,
    pub health_probe_failures: AtomicU64,
    pub dry_run_comparisons: AtomicU64,
    start_time: Instant,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(AHashMap::default()),
            total_requests: AtomicU64::new(0),
            composite_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            circuit_open_transitions: AtomicU64::new(0),
            circuit_short_circuits: AtomicU64::new(0),
            health_probes: AtomicU64::new(0),
            health_probe_failures: AtomicU64::new(0),
            dry_run_comparisons: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Registers a backend so its stats slot exists before traffic arrives.
    pub fn register_backend(&self, id: &str) {
        let mut map = self.backends.write().unwrap();
        map.entry(id.to_string()).or_default();
    }

    pub fn backend(&self, id: &str) -> Option<Arc<BackendMetrics>> {
        self.backends.read().unwrap().get(id).cloned()
    }

    pub fn record_backend_request(&self, id: &str, success: bool, latency: Duration) {
        if let Some(metrics) = self.backend(id) {
            metrics.record(success, latency);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// JSON snapshot for the metrics endpoint. Health flags are joined in by
    /// the route layer, which owns the health monitor handle.
    pub fn snapshot(&self, health: &dyn Fn(&str) -> Option<bool>) -> Value {
        let backends: serde_json::Map<String, Value> = self
            .backends
            .read()
            .unwrap()
            .iter()
            .map(|(id, m)| {
                let (requests, errors, avg_ms, max_ms) = m.summary();
                (
                    id.clone(),
                    json!({
                        "requests": requests,
                        "errors": errors,
                        "avg_latency_ms": avg_ms,
                        "max_latency_ms": max_ms,
                        "healthy": health(id),
                    }),
                )
            })
            .collect();

        json!({
            "backends": backends,
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "uptime_seconds": self.uptime_seconds(),
            "composite": {
                "requests": self.composite_requests.load(Ordering::Relaxed),
                "cache_hits": self.cache_hits.load(Ordering::Relaxed),
                "cache_misses": self.cache_misses.load(Ordering::Relaxed),
            },
            "circuit_breakers": {
                "open_transitions": self.circuit_open_transitions.load(Ordering::Relaxed),
                "short_circuits": self.circuit_short_circuits.load(Ordering::Relaxed),
            },
            "health_checks": {
                "probes": self.health_probes.load(Ordering::Relaxed),
                "failures": self.health_probe_failures.load(Ordering::Relaxed),
            },
            "dry_run": {
                "comparisons": self.dry_run_comparisons.load(Ordering::Relaxed),
            },
        })
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
