//! Per-backend circuit breakers.
//!
//! One state machine per backend id, shared by every route and tenant that
//! targets the backend. The request path acquires a permit before
//! forwarding and reports the tagged outcome afterwards; transitions happen
//! under a per-breaker lock so their event order is total.

use crate::models::config::CircuitBreakerSettings;
use crate::models::event::{
    GatewayEvent, CIRCUITBREAKER_CLOSED, CIRCUITBREAKER_HALFOPEN, CIRCUITBREAKER_OPEN,
};
use crate::services::events::EventBus;
use crate::services::metrics::GatewayMetrics;
use ahash::HashMap as AHashMap;
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Normal operation, requests pass through.
    Closed = 0,
    /// Failing fast, no outbound calls.
    Open = 1,
    /// Testing recovery with a bounded number of probes.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Tagged result of one outbound interaction, as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx/3xx/4xx: the backend answered.
    Success,
    /// Connection error or upstream 5xx.
    Failure,
    /// Deadline exceeded; counts as failure only when
    /// `count_timeouts_as_failures` is set.
    Timeout,
}

/// Admission token returned by [`CircuitBreaker::try_acquire`]. Must be
/// passed back to [`CircuitBreaker::record`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Regular pass-through (circuit closed).
    Pass,
    /// Half-open probe; completion decides the next transition.
    Probe,
}

/// Rejection: the circuit is open (or all probe slots are taken).
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker for backend {backend} is open")]
pub struct CircuitOpen {
    pub backend: String,
}

#[derive(Debug, Default)]
struct BreakerInner {
    opened_at: Option<Instant>,
}

/// Circuit breaker for a single backend.
///
/// Counters are atomics for the hot read path; `inner` is the transition
/// lock and holds the open-state timestamp.
pub struct CircuitBreaker {
    backend: String,
    settings: CircuitBreakerSettings,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    half_open_inflight: AtomicU64,
    inner: Mutex<BreakerInner>,
    events: Arc<EventBus>,
    metrics: Arc<GatewayMetrics>,
}

impl CircuitBreaker {
    pub fn new(
        backend: String,
        settings: CircuitBreakerSettings,
        events: Arc<EventBus>,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            settings,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            half_open_inflight: AtomicU64::new(0),
            inner: Mutex::new(BreakerInner::default()),
            events,
            metrics,
        })
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.open_timeout)
    }

    fn rejection(&self) -> CircuitOpen {
        self.metrics
            .circuit_short_circuits
            .fetch_add(1, Ordering::Relaxed);
        CircuitOpen {
            backend: self.backend.clone(),
        }
    }

    /// Requests admission for one outbound call.
    ///
    /// - `Closed`: always admitted.
    /// - `Open`: rejected until `open_timeout` has elapsed since the
    ///   transition; the first request after that flips the breaker to
    ///   `HalfOpen` and is admitted as the probe.
    /// - `HalfOpen`: admitted while fewer than
    ///   `half_open_allowed_requests` probes are in flight.
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpen> {
        loop {
            match self.state() {
                CircuitState::Closed => return Ok(Permit::Pass),
                CircuitState::Open => {
                    let guard = self.inner.lock().unwrap();
                    // Re-read under the lock; a concurrent caller may have
                    // already driven the transition.
                    if self.state() != CircuitState::Open {
                        continue;
                    }
                    let expired = guard
                        .opened_at
                        .map_or(true, |t| t.elapsed() >= self.open_timeout());
                    if !expired {
                        return Err(self.rejection());
                    }
                    self.half_open_successes.store(0, Ordering::Release);
                    self.half_open_inflight.store(1, Ordering::Release);
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    drop(guard);
                    info!("circuit breaker {} half-open, probing", self.backend);
                    self.events.emit(
                        GatewayEvent::new(CIRCUITBREAKER_HALFOPEN)
                            .backend(self.backend.clone())
                            .data(json!({"open_timeout_ms": self.settings.open_timeout})),
                    );
                    return Ok(Permit::Probe);
                }
                CircuitState::HalfOpen => {
                    let allowed = self.settings.half_open_allowed_requests.max(1);
                    let mut current = self.half_open_inflight.load(Ordering::Acquire);
                    loop {
                        if current >= allowed {
                            return Err(self.rejection());
                        }
                        match self.half_open_inflight.compare_exchange(
                            current,
                            current + 1,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => return Ok(Permit::Probe),
                            Err(actual) => current = actual,
                        }
                    }
                }
            }
        }
    }

    /// Reports the outcome of an admitted call.
    pub fn record(&self, permit: Permit, outcome: Outcome) {
        let counts_as_failure = match outcome {
            Outcome::Success => false,
            Outcome::Failure => true,
            Outcome::Timeout => self.settings.count_timeouts_as_failures,
        };
        let success = outcome == Outcome::Success;

        match permit {
            Permit::Pass => {
                if success {
                    self.consecutive_failures.store(0, Ordering::Release);
                } else if counts_as_failure {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    if failures >= self.settings.failure_threshold
                        && self.state() == CircuitState::Closed
                    {
                        self.transition_open();
                    }
                }
            }
            Permit::Probe => {
                // fetch_update avoids underflow if the breaker flipped while
                // this probe was in flight.
                let _ = self.half_open_inflight.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |v| v.checked_sub(1),
                );
                if success {
                    let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                    if successes >= self.settings.success_threshold
                        && self.state() == CircuitState::HalfOpen
                    {
                        self.transition_closed();
                    }
                } else if counts_as_failure {
                    self.transition_open();
                }
            }
        }
    }

    /// Opens the circuit (from any state) and restarts the open timer.
    fn transition_open(&self) {
        let mut guard = self.inner.lock().unwrap();
        let was_open = self.state() == CircuitState::Open;
        guard.opened_at = Some(Instant::now());
        if was_open {
            return;
        }
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        drop(guard);
        self.metrics
            .circuit_open_transitions
            .fetch_add(1, Ordering::Relaxed);
        warn!(
            "circuit breaker {} opened after {} consecutive failures",
            self.backend,
            self.consecutive_failures.load(Ordering::Acquire)
        );
        self.events.emit(
            GatewayEvent::new(CIRCUITBREAKER_OPEN)
                .backend(self.backend.clone())
                .data(json!({
                    "failure_threshold": self.settings.failure_threshold,
                })),
        );
    }

    /// Closes the circuit; only valid from `HalfOpen`.
    fn transition_closed(&self) {
        let guard = self.inner.lock().unwrap();
        if self.state() != CircuitState::HalfOpen {
            return;
        }
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        drop(guard);
        info!("circuit breaker {} closed, backend recovered", self.backend);
        self.events.emit(
            GatewayEvent::new(CIRCUITBREAKER_CLOSED)
                .backend(self.backend.clone())
                .data(json!({
                    "success_threshold": self.settings.success_threshold,
                })),
        );
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let opened_ago_ms = self
            .inner
            .lock()
            .unwrap()
            .opened_at
            .map(|t| t.elapsed().as_millis() as u64);
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            half_open_successes: self.half_open_successes.load(Ordering::Acquire),
            opened_ago_ms,
        }
    }
}

/// Point-in-time view for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub half_open_successes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_ago_ms: Option<u64>,
}

/// Id-indexed breaker map, built once at init.
///
/// A backend whose settings have `enabled: false` gets no entry; lookups
/// return `None` and the dispatcher forwards unguarded.
pub struct CircuitBreakerRegistry {
    breakers: AHashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: AHashMap::default(),
        }
    }

    pub fn register(
        &mut self,
        backend: &str,
        settings: &CircuitBreakerSettings,
        events: &Arc<EventBus>,
        metrics: &Arc<GatewayMetrics>,
    ) {
        if !settings.enabled || self.breakers.contains_key(backend) {
            return;
        }
        self.breakers.insert(
            backend.to_string(),
            CircuitBreaker::new(
                backend.to_string(),
                settings.clone(),
                Arc::clone(events),
                Arc::clone(metrics),
            ),
        );
    }

    pub fn get(&self, backend: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(backend).cloned()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.values().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
