//! Background health checking.
//!
//! One long-lived worker loop per backend, supervised by [`HealthChecker`].
//! A tick resolves the backend hostname, issues an HTTP probe against the
//! configured endpoint, and records the outcome; recent proxy traffic
//! through the backend counts as a liveness signal and skips the tick.
//! Health is an observability signal only: it never gates routing.

use crate::models::config::HealthCheckConfig;
use crate::models::event::{GatewayEvent, BACKEND_HEALTHY, BACKEND_UNHEALTHY};
use crate::services::events::EventBus;
use crate::services::metrics::GatewayMetrics;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Checks kept per backend for the debug endpoint.
const HISTORY_LIMIT: usize = 20;

/// How long shutdown waits for worker loops before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One probe result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct BackendHealth {
    healthy: Option<bool>,
    last_check: Option<DateTime<Utc>>,
    latency_ms: Option<u64>,
    last_error: Option<String>,
    last_proxied: Option<Instant>,
    history: VecDeque<CheckRecord>,
}

/// Point-in-time view for metrics and debug endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub backend: String,
    /// `None` until the first probe completes.
    pub healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub history: Vec<CheckRecord>,
}

/// Shared per-backend health state.
///
/// The dispatcher stamps [`HealthMonitor::mark_request`] on every forward so
/// the checker can skip backends that are demonstrably alive.
pub struct HealthMonitor {
    statuses: RwLock<HashMap<String, BackendHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_backend(&self, id: &str) {
        self.statuses
            .write()
            .unwrap()
            .entry(id.to_string())
            .or_default();
    }

    /// Records proxy traffic through a backend.
    pub fn mark_request(&self, id: &str) {
        if let Some(status) = self.statuses.write().unwrap().get_mut(id) {
            status.last_proxied = Some(Instant::now());
        }
    }

    pub fn is_healthy(&self, id: &str) -> Option<bool> {
        self.statuses
            .read()
            .unwrap()
            .get(id)
            .and_then(|s| s.healthy)
    }

    fn recently_proxied(&self, id: &str, threshold: Duration) -> bool {
        self.statuses
            .read()
            .unwrap()
            .get(id)
            .and_then(|s| s.last_proxied)
            .map(|t| t.elapsed() < threshold)
            .unwrap_or(false)
    }

    /// Stores a probe result; returns the previous healthy state so the
    /// caller can detect transitions.
    fn record_check(
        &self,
        id: &str,
        healthy: bool,
        latency: Duration,
        error: Option<String>,
    ) -> Option<bool> {
        let mut statuses = self.statuses.write().unwrap();
        let status = statuses.entry(id.to_string()).or_default();
        let previous = status.healthy;

        let record = CheckRecord {
            timestamp: Utc::now(),
            healthy,
            latency_ms: latency.as_millis() as u64,
            error: error.clone(),
        };
        status.healthy = Some(healthy);
        status.last_check = Some(record.timestamp);
        status.latency_ms = Some(record.latency_ms);
        status.last_error = error;
        status.history.push_back(record);
        while status.history.len() > HISTORY_LIMIT {
            status.history.pop_front();
        }
        previous
    }

    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut all: Vec<_> = self
            .statuses
            .read()
            .unwrap()
            .iter()
            .map(|(id, s)| HealthSnapshot {
                backend: id.clone(),
                healthy: s.healthy,
                last_check: s.last_check,
                latency_ms: s.latency_ms,
                last_error: s.last_error.clone(),
                history: s.history.iter().cloned().collect(),
            })
            .collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Supervisor of the per-backend probe loops.
pub struct HealthChecker {
    config: HealthCheckConfig,
    targets: Vec<(String, String)>,
    monitor: Arc<HealthMonitor>,
    client: Client,
    events: Arc<EventBus>,
    metrics: Arc<GatewayMetrics>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthChecker {
    /// `targets` is the (backend id, base URL) list to probe; backends with
    /// an empty URL are skipped at spawn time.
    pub fn new(
        config: HealthCheckConfig,
        targets: Vec<(String, String)>,
        monitor: Arc<HealthMonitor>,
        client: Client,
        events: Arc<EventBus>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            targets,
            monitor,
            client,
            events,
            metrics,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns one worker loop per probeable backend. A no-op when the
    /// subsystem is disabled.
    pub fn start(&self) {
        if !self.config.enabled {
            debug!("health checking disabled");
            return;
        }
        let mut handles = self.handles.lock().unwrap();
        for (id, url) in &self.targets {
            if url.is_empty() {
                debug!("skipping health checks for {} (no URL)", id);
                continue;
            }
            let worker = Worker {
                backend: id.clone(),
                base_url: url.clone(),
                endpoint: self
                    .config
                    .health_endpoints
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| "/health".to_string()),
                interval: Duration::from_secs(
                    *self.config.backend_intervals.get(id).unwrap_or(&self.config.interval),
                ),
                timeout: Duration::from_secs(
                    *self.config.backend_timeouts.get(id).unwrap_or(&self.config.timeout),
                ),
                recent_threshold: Duration::from_secs(self.config.recent_request_threshold),
                expected: self.config.expected_status_codes.clone(),
                monitor: Arc::clone(&self.monitor),
                client: self.client.clone(),
                events: Arc::clone(&self.events),
                metrics: Arc::clone(&self.metrics),
            };
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                worker.run(&mut shutdown).await;
            }));
        }
        info!("health checker started for {} backends", handles.len());
    }

    /// Stops all worker loops. Loops exit at their next suspension point;
    /// anything still running after the grace period is aborted. No health
    /// transition is recorded on the way out.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("health worker did not stop within grace period, aborting");
                handle.abort();
            }
        }
        info!("health checker stopped");
    }
}

struct Worker {
    backend: String,
    base_url: String,
    endpoint: String,
    interval: Duration,
    timeout: Duration,
    recent_threshold: Duration,
    expected: Vec<u16>,
    monitor: Arc<HealthMonitor>,
    client: Client,
    events: Arc<EventBus>,
    metrics: Arc<GatewayMetrics>,
}

impl Worker {
    async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => return,
            }

            if self
                .monitor
                .recently_proxied(&self.backend, self.recent_threshold)
            {
                debug!(
                    "skipping health check for {} (recent proxy traffic)",
                    self.backend
                );
                continue;
            }

            let started = Instant::now();
            let outcome = self.probe().await;
            let latency = started.elapsed();
            self.metrics.health_probes.fetch_add(1, Ordering::Relaxed);

            let (healthy, error) = match outcome {
                Ok(status) if self.expected.contains(&status) => (true, None),
                Ok(status) => (false, Some(format!("unexpected status {}", status))),
                Err(reason) => (false, Some(reason)),
            };
            if !healthy {
                self.metrics
                    .health_probe_failures
                    .fetch_add(1, Ordering::Relaxed);
            }

            let previous =
                self.monitor
                    .record_check(&self.backend, healthy, latency, error.clone());

            if previous != Some(healthy) {
                let name = if healthy { BACKEND_HEALTHY } else { BACKEND_UNHEALTHY };
                if healthy {
                    info!("backend {} healthy", self.backend);
                } else {
                    warn!(
                        "backend {} unhealthy: {}",
                        self.backend,
                        error.as_deref().unwrap_or("unknown")
                    );
                }
                self.events.emit(
                    GatewayEvent::new(name)
                        .backend(self.backend.clone())
                        .duration_ms(latency.as_millis() as u64)
                        .data(json!({
                            "error": error,
                            "endpoint": self.endpoint,
                        })),
                );
            }
        }
    }

    /// DNS resolution followed by an HTTP GET against the health endpoint.
    async fn probe(&self) -> Result<u16, String> {
        let parsed = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid backend URL: {}", e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| "backend URL has no host".to_string())?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let resolved = tokio::time::timeout(
            self.timeout,
            tokio::net::lookup_host((host, port)),
        )
        .await
        .map_err(|_| "DNS resolution timed out".to_string())?
        .map_err(|e| format!("DNS resolution failed: {}", e))?;
        if resolved.count() == 0 {
            return Err(format!("DNS resolved no addresses for {}", host));
        }

        let url = crate::utils::path::join_url(&self.base_url, &self.endpoint, None);
        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| "health probe timed out".to_string())?
            .map_err(|e| format!("health probe failed: {}", e))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_check_reports_previous_state() {
        let monitor = HealthMonitor::new();
        monitor.register_backend("api");

        let prev = monitor.record_check("api", true, Duration::from_millis(3), None);
        assert_eq!(prev, None);

        let prev = monitor.record_check(
            "api",
            false,
            Duration::from_millis(7),
            Some("refused".into()),
        );
        assert_eq!(prev, Some(true));
        assert_eq!(monitor.is_healthy("api"), Some(false));
    }

    #[test]
    fn history_is_bounded() {
        let monitor = HealthMonitor::new();
        for _ in 0..(HISTORY_LIMIT + 10) {
            monitor.record_check("api", true, Duration::from_millis(1), None);
        }
        let snapshot = monitor.snapshots().remove(0);
        assert_eq!(snapshot.history.len(), HISTORY_LIMIT);
    }

    #[test]
    fn recent_traffic_suppresses_probe() {
        let monitor = HealthMonitor::new();
        monitor.register_backend("api");
        assert!(!monitor.recently_proxied("api", Duration::from_secs(60)));
        monitor.mark_request("api");
        assert!(monitor.recently_proxied("api", Duration::from_secs(60)));
        assert!(!monitor.recently_proxied("api", Duration::ZERO));
    }
}
