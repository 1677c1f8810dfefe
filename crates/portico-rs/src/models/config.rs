//! Typed configuration tree for the portico gateway.
//!
//! The structure mirrors the configuration file one-to-one. Field names are
//! part of the compatibility surface and must not be renamed. Most knobs are
//! optional with defaults supplied through `default_*` functions so that a
//! minimal file (a couple of backends and routes) is enough to start.

use crate::models::tenant::TenantOverlay;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-route options attached to a pattern in `route_configs`.
///
/// # Examples
///
/// ```json
/// {
///   "feature_flag_id": "enable-v2",
///   "alternative_backend": "v1",
///   "timeout": 5,
///   "dry_run": true,
///   "dry_run_backend": "v2-candidate"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RouteConfig {
    /// Flag gating this route. When evaluation yields `false` the
    /// alternative backend (or 404) applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flag_id: Option<String>,

    /// Single fallback backend used when the flag is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_backend: Option<String>,

    /// Fallback backend group, rotated round-robin when the flag is off.
    /// Takes precedence over `alternative_backend` when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_backends: Option<Vec<String>>,

    /// Per-route timeout in seconds, overriding the global `request_timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Mirror traffic to a comparison backend and log the diff.
    #[serde(default)]
    pub dry_run: bool,

    /// Comparison backend for dry-run mode. Falls back to
    /// `alternative_backend` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_backend: Option<String>,
}

/// Merge strategy for composite routes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// First backend (in configured order) with a 2xx response wins.
    FirstSuccess,
    /// Structurally merge responses through a registered transformer;
    /// falls back to first-success when no transformer matches.
    Combine,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::FirstSuccess
    }
}

/// A route that fans out to several backends and merges their responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompositeRoute {
    /// URL pattern served by this composite (e.g. `/api/dashboard`).
    pub pattern: String,

    /// Ordered backend ids contacted in parallel. Merge order follows this
    /// list regardless of completion order.
    pub backends: Vec<String>,

    #[serde(default)]
    pub strategy: MergeStrategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flag_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_backend: Option<String>,
}

/// Path rewriting applied before forwarding to a backend.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PathRewrite {
    /// Prefix stripped from the inbound path when it matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_base_path: Option<String>,

    /// Prefix prepended after stripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path_rewrite: Option<String>,
}

/// Host header policy for outbound requests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostnameHandling {
    /// Forward the client's original Host header.
    PreserveOriginal,
    /// Let the HTTP client derive Host from the backend URL.
    UseBackend,
    /// Send `custom_hostname` verbatim.
    UseCustom,
}

impl Default for HostnameHandling {
    fn default() -> Self {
        Self::UseBackend
    }
}

/// Header rewriting applied before forwarding: removals first, then sets.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HeaderRewrite {
    #[serde(default)]
    pub hostname_handling: HostnameHandling,

    /// Host value used with [`HostnameHandling::UseCustom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_hostname: Option<String>,

    /// Headers set verbatim on the outbound request.
    #[serde(default)]
    pub set_headers: HashMap<String, String>,

    /// Headers removed from the outbound request.
    #[serde(default)]
    pub remove_headers: Vec<String>,
}

/// Per-backend configuration: URL, rewrite rules, overrides, and tuning.
///
/// # Examples
///
/// ```json
/// {
///   "url": "http://billing.internal:8080",
///   "path_rewriting": {"strip_base_path": "/billing", "base_path_rewrite": "/v2"},
///   "header_rewriting": {
///     "hostname_handling": "use_custom",
///     "custom_hostname": "billing.internal",
///     "set_headers": {"X-Gateway": "portico"},
///     "remove_headers": ["X-Debug"]
///   },
///   "endpoints": {"/billing/invoices/*": {"base_path_rewrite": "/v3/invoices"}},
///   "max_retries": 2,
///   "retry_delay": 100
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Base URL override. Empty/absent at global level means a tenant
    /// overlay must supply it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_rewriting: Option<PathRewrite>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_rewriting: Option<HeaderRewrite>,

    /// Endpoint-specific path rewrites, keyed by pattern. A matching pattern
    /// takes precedence over `path_rewriting`.
    #[serde(default)]
    pub endpoints: HashMap<String, PathRewrite>,

    /// Flag gating this backend; the alternative applies when off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flag_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_backend: Option<String>,

    /// Retries for connect-level failures only (never after bytes were sent
    /// downstream).
    #[serde(default)]
    pub max_retries: u32,

    /// Delay between retries, milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Connection tuning knobs, accepted for compatibility. The outbound
    /// client is a single shared pool with per-request deadlines, so these
    /// do not create per-backend pools.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Accepted for compatibility; queuing is handled by the actix worker
    /// pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            path_rewriting: None,
            header_rewriting: None,
            endpoints: HashMap::new(),
            feature_flag_id: None,
            alternative_backend: None,
            max_retries: 0,
            retry_delay: default_retry_delay(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            idle_timeout: default_idle_timeout(),
            queue_size: None,
            queue_timeout: None,
        }
    }
}

fn default_retry_delay() -> u64 {
    100
}

fn default_max_connections() -> usize {
    32
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    30
}

/// Background health checking configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Probe interval, seconds.
    #[serde(default = "default_health_interval")]
    pub interval: u64,

    /// Probe timeout, seconds.
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,

    /// A backend proxied through within this many seconds is considered
    /// alive and its tick is skipped.
    #[serde(default = "default_recent_request_threshold")]
    pub recent_request_threshold: u64,

    /// Statuses counted as healthy.
    #[serde(default = "default_expected_status_codes")]
    pub expected_status_codes: Vec<u16>,

    /// Per-backend probe path override (default `/health`).
    #[serde(default)]
    pub health_endpoints: HashMap<String, String>,

    /// Per-backend interval override, seconds.
    #[serde(default)]
    pub backend_intervals: HashMap<String, u64>,

    /// Per-backend timeout override, seconds.
    #[serde(default)]
    pub backend_timeouts: HashMap<String, u64>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            recent_request_threshold: default_recent_request_threshold(),
            expected_status_codes: default_expected_status_codes(),
            health_endpoints: HashMap::new(),
            backend_intervals: HashMap::new(),
            backend_timeouts: HashMap::new(),
        }
    }
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_recent_request_threshold() -> u64 {
    60
}

fn default_expected_status_codes() -> Vec<u16> {
    vec![200]
}

/// Feature flag subsystem configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureFlagsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Global flag values; tenant overlays may override per key.
    #[serde(default)]
    pub flags: HashMap<String, bool>,
}

/// Which side of a dry-run pair answers the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSide {
    Primary,
    Secondary,
}

impl Default for ResponseSide {
    fn default() -> Self {
        Self::Primary
    }
}

/// Dry-run (shadow traffic) configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DryRunConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Log full response bodies in diffs (debug level) rather than sizes.
    #[serde(default)]
    pub log_responses: bool,

    /// Cap on buffered bodies per side, bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Headers included in the comparison. Empty means all headers, minus
    /// `ignore_headers`.
    #[serde(default)]
    pub compare_headers: Vec<String>,

    #[serde(default = "default_ignore_headers")]
    pub ignore_headers: Vec<String>,

    #[serde(default)]
    pub default_response_backend: ResponseSide,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_responses: false,
            max_body_size: default_max_body_size(),
            compare_headers: Vec::new(),
            ignore_headers: default_ignore_headers(),
            default_response_backend: ResponseSide::Primary,
        }
    }
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_ignore_headers() -> Vec<String> {
    vec!["date".to_string(), "x-request-id".to_string()]
}

/// Debug endpoint configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DebugEndpointsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_debug_base_path")]
    pub base_path: String,

    #[serde(default)]
    pub require_auth: bool,

    #[serde(default)]
    pub auth_token: String,
}

impl Default for DebugEndpointsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: default_debug_base_path(),
            require_auth: false,
            auth_token: String::new(),
        }
    }
}

fn default_debug_base_path() -> String {
    "/debug".to_string()
}

/// Circuit breaker thresholds and timing, globally or per backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Milliseconds the circuit stays open before the next request is
    /// admitted as a half-open probe.
    #[serde(default = "default_open_timeout")]
    pub open_timeout: u64,

    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,

    /// Concurrent probes admitted while half-open.
    #[serde(default = "default_half_open_allowed")]
    pub half_open_allowed_requests: u64,

    /// Whether deadline-exceeded outcomes count as failures.
    #[serde(default = "default_true")]
    pub count_timeouts_as_failures: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            open_timeout: default_open_timeout(),
            success_threshold: default_success_threshold(),
            half_open_allowed_requests: default_half_open_allowed(),
            count_timeouts_as_failures: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_open_timeout() -> u64 {
    30_000
}

fn default_success_threshold() -> u64 {
    3
}

fn default_half_open_allowed() -> u64 {
    1
}

/// Root configuration for the gateway module.
///
/// Loaded from JSON by [`crate::config::settings::load_settings`] and merged
/// per tenant by [`crate::models::tenant::merge`]. The merged result for a
/// tenant is itself a `GatewayConfig`, so every consumer works on one type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Backend id → base URL. A URL may be empty at the global level when a
    /// tenant overlay supplies it.
    #[serde(default)]
    pub backend_services: HashMap<String, String>,

    /// Pattern → backend id, or a comma-delimited ordered id list forming a
    /// round-robin group.
    #[serde(default)]
    pub routes: HashMap<String, String>,

    #[serde(default)]
    pub route_configs: HashMap<String, RouteConfig>,

    /// Backend serving the `/*` catch-all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,

    /// Keyed by an arbitrary name; the `pattern` field inside each entry is
    /// what requests match against.
    #[serde(default)]
    pub composite_routes: HashMap<String, CompositeRoute>,

    #[serde(default)]
    pub backend_configs: HashMap<String, BackendConfig>,

    /// Monotonic opt-in: OR-merged with tenant overlays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,

    /// Cache TTL, seconds. Zero disables insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,

    #[serde(default = "default_tenant_id_header")]
    pub tenant_id_header: String,

    #[serde(default)]
    pub require_tenant_id: bool,

    /// Default outbound deadline, seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Accepted for compatibility but rejected by validation; see the
    /// validation module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout: Option<u64>,

    /// Monotonic opt-in: OR-merged with tenant overlays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_enabled: Option<bool>,

    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub feature_flags: FeatureFlagsConfig,

    #[serde(default)]
    pub dry_run: DryRunConfig,

    #[serde(default)]
    pub debug_endpoints: DebugEndpointsConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Per-backend circuit breaker overrides.
    #[serde(default)]
    pub backend_circuit_breakers: HashMap<String, CircuitBreakerSettings>,

    /// Tenant id → configuration overlay, registered at init.
    #[serde(default)]
    pub tenants: HashMap<String, TenantOverlay>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_services: HashMap::new(),
            routes: HashMap::new(),
            route_configs: HashMap::new(),
            default_backend: None,
            composite_routes: HashMap::new(),
            backend_configs: HashMap::new(),
            cache_enabled: None,
            cache_ttl: None,
            tenant_id_header: default_tenant_id_header(),
            require_tenant_id: false,
            request_timeout: default_request_timeout(),
            global_timeout: None,
            metrics_enabled: None,
            metrics_endpoint: default_metrics_endpoint(),
            health_check: HealthCheckConfig::default(),
            feature_flags: FeatureFlagsConfig::default(),
            dry_run: DryRunConfig::default(),
            debug_endpoints: DebugEndpointsConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            backend_circuit_breakers: HashMap::new(),
            tenants: HashMap::new(),
        }
    }
}

fn default_tenant_id_header() -> String {
    "X-Tenant-ID".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

impl GatewayConfig {
    /// Effective base URL for a backend: `backend_configs[id].url` wins over
    /// `backend_services[id]`.
    pub fn backend_url(&self, id: &str) -> Option<String> {
        if let Some(cfg) = self.backend_configs.get(id) {
            if let Some(url) = &cfg.url {
                if !url.is_empty() {
                    return Some(url.clone());
                }
            }
        }
        self.backend_services
            .get(id)
            .filter(|u| !u.is_empty())
            .cloned()
    }

    /// Circuit breaker settings for a backend: per-backend override, else
    /// the global section.
    pub fn breaker_settings(&self, id: &str) -> &CircuitBreakerSettings {
        self.backend_circuit_breakers
            .get(id)
            .unwrap_or(&self.circuit_breaker)
    }

    /// Whether caching applies (monotonic flag resolved, TTL present).
    pub fn cache_active(&self) -> bool {
        self.cache_enabled.unwrap_or(false)
    }

    /// Cache TTL in seconds; zero when unset.
    pub fn cache_ttl_secs(&self) -> u64 {
        self.cache_ttl.unwrap_or(0)
    }

    /// All backend ids referenced anywhere in routing config (routes,
    /// composites, alternatives, default backend).
    pub fn referenced_backend_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for value in self.routes.values() {
            for id in value.split(',') {
                let id = id.trim();
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
            }
        }
        for route in self.composite_routes.values() {
            ids.extend(route.backends.iter().cloned());
            if let Some(alt) = &route.alternative_backend {
                ids.push(alt.clone());
            }
        }
        for rc in self.route_configs.values() {
            if let Some(alt) = &rc.alternative_backend {
                ids.push(alt.clone());
            }
            if let Some(alts) = &rc.alternative_backends {
                ids.extend(alts.iter().cloned());
            }
            if let Some(dr) = &rc.dry_run_backend {
                ids.push(dr.clone());
            }
        }
        for bc in self.backend_configs.values() {
            if let Some(alt) = &bc.alternative_backend {
                ids.push(alt.clone());
            }
        }
        if let Some(default) = &self.default_backend {
            ids.push(default.clone());
        }
        ids.sort();
        ids.dedup();
        ids
    }
}
