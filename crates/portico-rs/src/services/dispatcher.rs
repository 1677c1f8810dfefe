//! Request dispatcher: resolves (tenant, path) to a handler and forwards.
//!
//! This is the module's assembly point. [`RequestDispatcher::new`] builds
//! every subsystem from the validated configuration (merged tenant configs,
//! proxy registry, circuit breakers, cache, flags, health checker, metrics,
//! event bus); `handle_request` implements the decision sequence for one
//! request:
//!
//! 1. tenant gate (400 before any other processing)
//! 2. effective per-tenant configuration
//! 3. route-level feature flag, with alternative-backend substitution
//! 4. backend-level feature flag, same substitution
//! 5. round-robin selection for comma-delimited groups
//! 6. dispatch: single-backend proxy (behind the circuit breaker),
//!    composite fan-out, or dry-run pair
//!
//! Health and circuit state are independent signals; neither gates routing.

use crate::config::validation::ConfigValidator;
use crate::models::config::{CompositeRoute, GatewayConfig, RouteConfig};
use crate::models::error::GatewayError;
use crate::models::event::{
    GatewayEvent, BACKEND_ADDED, LOADBALANCE_DECISION, LOADBALANCE_ROUNDROBIN, MODULE_STARTED,
    MODULE_STOPPED, PROXY_STARTED, PROXY_STOPPED, REQUEST_FAILED, REQUEST_PROXIED,
    REQUEST_RECEIVED,
};
use crate::models::tenant::{self, TenantOverlay};
use crate::services::cache::ResponseCache;
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::composite::{CompositeExecutor, EndpointTransform, TransformerRegistry};
use crate::services::dry_run::DryRunExecutor;
use crate::services::events::{EventBus, EventObserver};
use crate::services::flags::{FileFlagEvaluator, FlagAggregator, FlagEvaluator, RequestContext};
use crate::services::health::{HealthChecker, HealthMonitor, HealthSnapshot};
use crate::services::metrics::GatewayMetrics;
use crate::services::proxy::{ForwardParts, ProxyRegistry, UpstreamResult};
use crate::utils::pattern::CompiledPattern;
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{Error as ActixError, HttpRequest, HttpResponse};
use ahash::HashMap as AHashMap;
use log::{info, warn};
use reqwest::Client;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How a resolved route is served.
enum RouteKind {
    Single { backends: Vec<String> },
    Composite { route: CompositeRoute },
}

struct RouteEntry {
    pattern: CompiledPattern,
    kind: RouteKind,
    config: Option<RouteConfig>,
}

/// Compiled route patterns for one configuration scope, most specific
/// pattern first.
struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    fn build(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut entries = Vec::new();

        for (pattern, value) in &config.routes {
            let compiled =
                CompiledPattern::compile(pattern).map_err(|e| GatewayError::Config {
                    message: format!("route pattern '{}': {}", pattern, e),
                })?;
            let backends: Vec<String> = value
                .split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
            if backends.is_empty() {
                return Err(GatewayError::Config {
                    message: format!("route '{}' has no backend ids", pattern),
                });
            }
            entries.push(RouteEntry {
                pattern: compiled,
                kind: RouteKind::Single { backends },
                config: config.route_configs.get(pattern).cloned(),
            });
        }

        for route in config.composite_routes.values() {
            let compiled =
                CompiledPattern::compile(&route.pattern).map_err(|e| GatewayError::Config {
                    message: format!("composite pattern '{}': {}", route.pattern, e),
                })?;
            entries.push(RouteEntry {
                pattern: compiled,
                kind: RouteKind::Composite {
                    route: route.clone(),
                },
                config: config.route_configs.get(&route.pattern).cloned(),
            });
        }

        entries.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));
        Ok(Self { entries })
    }

    fn resolve(&self, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.pattern.matches(path))
    }
}

/// The gateway module: owns every subsystem and serves requests.
pub struct RequestDispatcher {
    global: GatewayConfig,
    tenant_configs: HashMap<String, Arc<GatewayConfig>>,
    global_table: RouteTable,
    tenant_tables: HashMap<String, RouteTable>,
    registry: Arc<ProxyRegistry>,
    breakers: CircuitBreakerRegistry,
    cache: Arc<ResponseCache>,
    flags: Arc<FlagAggregator>,
    events: Arc<EventBus>,
    metrics: Arc<GatewayMetrics>,
    health_monitor: Arc<HealthMonitor>,
    health_checker: HealthChecker,
    composite: CompositeExecutor,
    dry_run: DryRunExecutor,
    transformers: Arc<TransformerRegistry>,
    rr_counters: AHashMap<String, Arc<AtomicUsize>>,
    client: Client,
    reserved_prefixes: Vec<String>,
}

impl RequestDispatcher {
    /// Builds the module from a configuration. Fails on any validation
    /// error (dangling backend references, cyclic alternatives, bad URLs).
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_components(config, Vec::new(), Vec::new())
    }

    /// Like [`RequestDispatcher::new`] with additional event observers and
    /// feature-flag evaluators (the built-in file evaluator is always
    /// appended at weight 1000).
    pub fn with_components(
        config: GatewayConfig,
        observers: Vec<Arc<dyn EventObserver>>,
        extra_evaluators: Vec<Arc<dyn FlagEvaluator>>,
    ) -> Result<Self, GatewayError> {
        let validation = ConfigValidator::validate(&config);
        if !validation.is_valid() {
            return Err(GatewayError::Config {
                message: validation.errors.join("; "),
            });
        }
        validation.log_non_fatal();

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| GatewayError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let mut all_observers: Vec<Arc<dyn EventObserver>> =
            vec![Arc::new(crate::services::events::LogObserver)];
        all_observers.extend(observers);
        let events = Arc::new(EventBus::new(all_observers));

        let metrics = Arc::new(GatewayMetrics::new());
        let cache = Arc::new(ResponseCache::new());
        let health_monitor = Arc::new(HealthMonitor::new());

        let tenant_configs: HashMap<String, Arc<GatewayConfig>> = config
            .tenants
            .iter()
            .map(|(id, overlay)| (id.clone(), Arc::new(tenant::merge(&config, overlay))))
            .collect();

        let global_table = RouteTable::build(&config)?;
        let mut tenant_tables = HashMap::new();
        for (id, effective) in &tenant_configs {
            tenant_tables.insert(id.clone(), RouteTable::build(effective)?);
        }

        let registry = Arc::new(ProxyRegistry::build(&config, &tenant_configs, &client));

        let mut breakers = CircuitBreakerRegistry::new();
        for id in known_backend_ids(&config, &tenant_configs) {
            let settings = config.breaker_settings(&id).clone();
            breakers.register(&id, &settings, &events, &metrics);
            metrics.register_backend(&id);
            health_monitor.register_backend(&id);
        }

        let rr_counters = build_rr_counters(&config, &tenant_configs);

        let tenant_flags: HashMap<String, HashMap<String, bool>> = config
            .tenants
            .iter()
            .map(|(id, overlay)| (id.clone(), overlay.feature_flags.clone()))
            .collect();
        let mut evaluators: Vec<Arc<dyn FlagEvaluator>> = extra_evaluators;
        evaluators.push(Arc::new(FileFlagEvaluator::from_config(
            &config.feature_flags,
            tenant_flags,
        )));
        let flags = Arc::new(FlagAggregator::new(
            evaluators,
            config.feature_flags.enabled,
            Arc::clone(&events),
        ));

        let transformers = Arc::new(TransformerRegistry::new());
        let composite = CompositeExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&health_monitor),
            Arc::clone(&metrics),
            Arc::clone(&transformers),
        );
        let dry_run = DryRunExecutor::new(Arc::clone(&metrics));

        let health_checker = HealthChecker::new(
            config.health_check.clone(),
            health_targets(&config, &tenant_configs),
            Arc::clone(&health_monitor),
            client.clone(),
            Arc::clone(&events),
            Arc::clone(&metrics),
        );

        let reserved_prefixes = vec![
            "/health".to_string(),
            "/ready".to_string(),
            "/live".to_string(),
            config.metrics_endpoint.clone(),
            config.debug_endpoints.base_path.clone(),
        ];

        Ok(Self {
            global: config,
            tenant_configs,
            global_table,
            tenant_tables,
            registry,
            breakers,
            cache,
            flags,
            events,
            metrics,
            health_monitor,
            health_checker,
            composite,
            dry_run,
            transformers,
            rr_counters,
            client,
            reserved_prefixes,
        })
    }

    /// Registers a tenant overlay after construction. The merged config is
    /// validated the same way init is; new backends get breakers, metrics
    /// slots, and `backend.added` events.
    pub fn register_tenant(
        &mut self,
        tenant_id: &str,
        overlay: TenantOverlay,
    ) -> Result<(), GatewayError> {
        let effective = tenant::merge(&self.global, &overlay);
        let validation = ConfigValidator::validate(&effective);
        if !validation.is_valid() {
            return Err(GatewayError::Config {
                message: format!(
                    "tenant {} overlay invalid: {}",
                    tenant_id,
                    validation.errors.join("; ")
                ),
            });
        }
        let table = RouteTable::build(&effective)?;

        let before: HashSet<String> =
            known_backend_ids(&self.global, &self.tenant_configs).into_iter().collect();

        self.global.tenants.insert(tenant_id.to_string(), overlay);
        self.tenant_configs
            .insert(tenant_id.to_string(), Arc::new(effective));
        self.tenant_tables.insert(tenant_id.to_string(), table);
        self.registry = Arc::new(ProxyRegistry::build(
            &self.global,
            &self.tenant_configs,
            &self.client,
        ));
        self.composite = CompositeExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.health_monitor),
            Arc::clone(&self.metrics),
            Arc::clone(&self.transformers),
        );

        for id in known_backend_ids(&self.global, &self.tenant_configs) {
            if !before.contains(&id) {
                let settings = self.global.breaker_settings(&id).clone();
                self.breakers
                    .register(&id, &settings, &self.events, &self.metrics);
                self.metrics.register_backend(&id);
                self.health_monitor.register_backend(&id);
                self.events.emit(
                    GatewayEvent::new(BACKEND_ADDED)
                        .backend(id)
                        .tenant(Some(tenant_id)),
                );
            }
        }
        for (key, counter) in build_rr_counters(&self.global, &self.tenant_configs) {
            self.rr_counters.entry(key).or_insert(counter);
        }
        info!("registered tenant {}", tenant_id);
        Ok(())
    }

    /// Registers a named endpoint transform for composite routes.
    pub fn register_transformer(
        &self,
        pattern: &str,
        transform: Arc<dyn EndpointTransform>,
    ) -> Result<(), GatewayError> {
        self.transformers.register(pattern, transform)
    }

    /// Emits lifecycle events and starts the health checker.
    pub fn start(&self) {
        self.events.emit(GatewayEvent::new(MODULE_STARTED));
        for id in known_backend_ids(&self.global, &self.tenant_configs) {
            self.events.emit(GatewayEvent::new(BACKEND_ADDED).backend(id));
        }
        self.health_checker.start();
        self.events.emit(GatewayEvent::new(PROXY_STARTED));
        info!("gateway module started");
    }

    /// Graceful shutdown: stop probing, clear the cache, emit stop events.
    pub async fn shutdown(&self) {
        self.health_checker.stop().await;
        self.cache.clear();
        self.events.emit(GatewayEvent::new(PROXY_STOPPED));
        self.events.emit(GatewayEvent::new(MODULE_STOPPED));
        info!("gateway module stopped");
    }

    /// Entry point bound to the catch-all route.
    pub async fn handle_request(
        &self,
        req: HttpRequest,
        body: Bytes,
    ) -> Result<HttpResponse, ActixError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        let tenant = req
            .headers()
            .get(self.global.tenant_id_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        self.events.emit(
            GatewayEvent::new(REQUEST_RECEIVED)
                .tenant(tenant.as_deref())
                .request_id(request_id)
                .data(json!({
                    "method": req.method().as_str(),
                    "path": req.path(),
                })),
        );

        // Tenant gate: before any other processing, no outbound call.
        if self.global.require_tenant_id && tenant.is_none() {
            let err = GatewayError::TenantRequired {
                header: self.global.tenant_id_header.clone(),
            };
            self.emit_failed(&err, None, request_id, started, req.path());
            return Err(err.into());
        }

        match self
            .dispatch(&req, body, tenant.as_deref(), request_id)
            .await
        {
            Ok(response) => {
                self.events.emit(
                    GatewayEvent::new(REQUEST_PROXIED)
                        .tenant(tenant.as_deref())
                        .request_id(request_id)
                        .duration_ms(started.elapsed().as_millis() as u64)
                        .data(json!({
                            "status": response.status().as_u16(),
                            "path": req.path(),
                        })),
                );
                Ok(response)
            }
            Err(err) => {
                self.emit_failed(&err, tenant.as_deref(), request_id, started, req.path());
                Err(err.into())
            }
        }
    }

    fn emit_failed(
        &self,
        err: &GatewayError,
        tenant: Option<&str>,
        request_id: Uuid,
        started: Instant,
        path: &str,
    ) {
        self.events.emit(
            GatewayEvent::new(REQUEST_FAILED)
                .tenant(tenant)
                .request_id(request_id)
                .duration_ms(started.elapsed().as_millis() as u64)
                .data(json!({
                    "kind": err.kind(),
                    "path": path,
                })),
        );
    }

    async fn dispatch(
        &self,
        req: &HttpRequest,
        body: Bytes,
        tenant: Option<&str>,
        request_id: Uuid,
    ) -> Result<HttpResponse, GatewayError> {
        let (effective, table) = self.scope_for(tenant);
        let parts = ForwardParts::from_request(req);
        let ctx = request_context(&parts);
        let path = req.path();

        let Some(entry) = table.resolve(path) else {
            // Catch-all: the default backend serves unmatched paths, except
            // reserved internal prefixes which must never be proxied.
            if !self.is_reserved(path) {
                if let Some(default) = effective.default_backend.clone() {
                    return self
                        .dispatch_single(default, None, effective, tenant, &parts, body, request_id)
                        .await;
                }
            }
            return Err(GatewayError::RouteNotFound {
                path: path.to_string(),
            });
        };

        match &entry.kind {
            RouteKind::Composite { route } => {
                if let Some(flag) = &route.feature_flag_id {
                    if !self.flags.is_enabled(flag, tenant, &ctx, true) {
                        if let Some(alt) = route.alternative_backend.clone() {
                            let alt = self.substitute_backend(alt, effective, tenant, &ctx)?;
                            return self
                                .dispatch_single(
                                    alt,
                                    entry.config.as_ref(),
                                    effective,
                                    tenant,
                                    &parts,
                                    body,
                                    request_id,
                                )
                                .await;
                        }
                        return Err(GatewayError::RouteNotFound {
                            path: path.to_string(),
                        });
                    }
                }
                let deadline = self.deadline(entry.config.as_ref(), effective);
                self.composite
                    .handle(route, effective, tenant, &parts, body, deadline)
                    .await
            }
            RouteKind::Single { backends } => {
                let rc = entry.config.as_ref();
                let mut group = backends.clone();
                let mut rr_key = entry.pattern.pattern.clone();

                // Route-level flag gate with alternative substitution.
                if let Some(rc) = rc {
                    if let Some(flag) = &rc.feature_flag_id {
                        if !self.flags.is_enabled(flag, tenant, &ctx, true) {
                            if let Some(alts) = rc
                                .alternative_backends
                                .as_ref()
                                .filter(|alts| !alts.is_empty())
                            {
                                group = alts.clone();
                                rr_key = format!("{}#alt", entry.pattern.pattern);
                            } else if let Some(alt) = &rc.alternative_backend {
                                group = vec![alt.clone()];
                            } else {
                                return Err(GatewayError::RouteNotFound {
                                    path: path.to_string(),
                                });
                            }
                        }
                    }
                }

                let backend = self.select_backend(&rr_key, &group, tenant, request_id);
                let backend = self.substitute_backend(backend, effective, tenant, &ctx)?;

                // Dry-run pairing when enabled on both the route and the
                // module.
                if let Some(rc) = rc {
                    if rc.dry_run && effective.dry_run.enabled {
                        let comparison = rc
                            .dry_run_backend
                            .clone()
                            .or_else(|| rc.alternative_backend.clone());
                        if let Some(comparison) = comparison {
                            match (
                                self.registry.proxy_for(&backend, tenant),
                                self.registry.proxy_for(&comparison, tenant),
                            ) {
                                (Some(primary), Some(secondary)) => {
                                    let deadline = self.deadline(Some(rc), effective);
                                    self.health_monitor.mark_request(&backend);
                                    self.health_monitor.mark_request(&comparison);
                                    return self
                                        .dry_run
                                        .handle(
                                            primary,
                                            secondary,
                                            &effective.dry_run,
                                            &parts,
                                            body,
                                            deadline,
                                        )
                                        .await;
                                }
                                _ => warn!(
                                    "dry-run pair ({}, {}) not materialized, serving primary only",
                                    backend, comparison
                                ),
                            }
                        }
                    }
                }

                self.dispatch_single(backend, rc, effective, tenant, &parts, body, request_id)
                    .await
            }
        }
    }

    /// Round-robin selection over a backend group. Single-member groups
    /// short-circuit and emit no load-balance events.
    fn select_backend(
        &self,
        rr_key: &str,
        group: &[String],
        tenant: Option<&str>,
        request_id: Uuid,
    ) -> String {
        if group.len() == 1 {
            return group[0].clone();
        }
        let previous = match self.rr_counters.get(rr_key) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };
        let index = previous % group.len();
        let backend = group[index].clone();

        self.events.emit(
            GatewayEvent::new(LOADBALANCE_DECISION)
                .backend(backend.clone())
                .tenant(tenant)
                .request_id(request_id)
                .data(json!({
                    "route": rr_key,
                    "index": index,
                    "group_size": group.len(),
                })),
        );
        if index == 0 && previous > 0 {
            self.events.emit(
                GatewayEvent::new(LOADBALANCE_ROUNDROBIN)
                    .tenant(tenant)
                    .request_id(request_id)
                    .data(json!({
                        "route": rr_key,
                        "rotations": previous / group.len(),
                    })),
            );
        }
        backend
    }

    /// Backend-level flag gate. Substitution repeats down the alternative
    /// chain; init-time validation guarantees the chain is acyclic.
    fn substitute_backend(
        &self,
        mut backend: String,
        effective: &GatewayConfig,
        tenant: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<String, GatewayError> {
        let mut seen = HashSet::new();
        while let Some(bc) = effective.backend_configs.get(&backend) {
            let Some(flag) = &bc.feature_flag_id else { break };
            if self.flags.is_enabled(flag, tenant, ctx, true) {
                break;
            }
            let Some(alt) = bc.alternative_backend.clone() else {
                return Err(GatewayError::RouteNotFound {
                    path: ctx.path.clone(),
                });
            };
            if !seen.insert(backend.clone()) {
                break;
            }
            backend = alt;
        }
        Ok(backend)
    }

    async fn dispatch_single(
        &self,
        backend: String,
        rc: Option<&RouteConfig>,
        effective: &GatewayConfig,
        tenant: Option<&str>,
        parts: &ForwardParts,
        body: Bytes,
        _request_id: Uuid,
    ) -> Result<HttpResponse, GatewayError> {
        let deadline = self.deadline(rc, effective);
        let Some(proxy) = self.registry.proxy_for(&backend, tenant) else {
            return Err(GatewayError::Upstream {
                backend: backend.clone(),
                message: "backend has no configured URL".to_string(),
            });
        };

        let breaker = self.breakers.get(&backend);
        let permit = match &breaker {
            Some(b) => Some(b.try_acquire().map_err(|e| GatewayError::CircuitOpen {
                backend: e.backend,
            })?),
            None => None,
        };

        let started = Instant::now();
        let result = proxy.forward(parts, body, deadline).await;
        self.health_monitor.mark_request(&backend);

        if let (Some(b), Some(p)) = (&breaker, permit) {
            b.record(p, result.outcome());
        }
        self.metrics
            .record_backend_request(&backend, result.is_2xx(), started.elapsed());

        match result {
            UpstreamResult::Response {
                status,
                headers,
                body,
            } => {
                let mut builder = HttpResponse::build(
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                );
                for (name, value) in headers.iter() {
                    if name.as_str().eq_ignore_ascii_case("connection")
                        || name.as_str().eq_ignore_ascii_case("transfer-encoding")
                    {
                        continue;
                    }
                    if let Ok(value) =
                        actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
                    {
                        builder.insert_header((name.as_str(), value));
                    }
                }
                Ok(builder.body(body))
            }
            UpstreamResult::ConnectError(message) => Err(GatewayError::Upstream {
                backend,
                message,
            }),
            UpstreamResult::Timeout => Err(GatewayError::Timeout {
                backend,
                timeout_secs: deadline.as_secs(),
            }),
        }
    }

    fn deadline(&self, rc: Option<&RouteConfig>, effective: &GatewayConfig) -> Duration {
        let secs = rc
            .and_then(|c| c.timeout)
            .unwrap_or(effective.request_timeout);
        Duration::from_secs(secs)
    }

    fn scope_for(&self, tenant: Option<&str>) -> (&GatewayConfig, &RouteTable) {
        if let Some(tenant) = tenant {
            if let (Some(config), Some(table)) = (
                self.tenant_configs.get(tenant),
                self.tenant_tables.get(tenant),
            ) {
                return (config.as_ref(), table);
            }
        }
        (&self.global, &self.global_table)
    }

    fn is_reserved(&self, path: &str) -> bool {
        self.reserved_prefixes
            .iter()
            .any(|prefix| path == prefix || path.starts_with(&format!("{}/", prefix)))
    }

    // Accessors for the routes layer.

    pub fn global_config(&self) -> &GatewayConfig {
        &self.global
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenant_configs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All backend ids known to the module, across global config and tenant
    /// overlays.
    pub fn backend_ids(&self) -> Vec<String> {
        known_backend_ids(&self.global, &self.tenant_configs)
    }

    pub fn tenant_config(&self, tenant: &str) -> Option<Arc<GatewayConfig>> {
        self.tenant_configs.get(tenant).cloned()
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.health_monitor.snapshots()
    }

    pub fn is_healthy(&self, backend: &str) -> Option<bool> {
        self.health_monitor.is_healthy(backend)
    }

    pub fn breaker_snapshots(&self) -> Vec<crate::services::circuit_breaker::BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the metrics endpoint should be registered: the global flag
    /// or any tenant opting in (the flag is monotonic).
    pub fn metrics_route_enabled(&self) -> bool {
        self.global.metrics_enabled.unwrap_or(false)
            || self
                .tenant_configs
                .values()
                .any(|c| c.metrics_enabled.unwrap_or(false))
    }
}

fn request_context(parts: &ForwardParts) -> RequestContext {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    RequestContext {
        method: parts.method.as_str().to_string(),
        path: parts.path.clone(),
        headers,
    }
}

/// Union of backend ids across the global config and every tenant overlay.
fn known_backend_ids(
    global: &GatewayConfig,
    tenant_configs: &HashMap<String, Arc<GatewayConfig>>,
) -> Vec<String> {
    let mut ids: HashSet<String> = global
        .backend_services
        .keys()
        .chain(global.backend_configs.keys())
        .cloned()
        .collect();
    for config in tenant_configs.values() {
        ids.extend(
            config
                .backend_services
                .keys()
                .chain(config.backend_configs.keys())
                .cloned(),
        );
    }
    let mut ids: Vec<String> = ids.into_iter().collect();
    ids.sort();
    ids
}

/// One shared atomic counter per route pattern (and per alternative group).
fn build_rr_counters(
    global: &GatewayConfig,
    tenant_configs: &HashMap<String, Arc<GatewayConfig>>,
) -> AHashMap<String, Arc<AtomicUsize>> {
    let mut counters = AHashMap::default();
    let mut add_scope = |config: &GatewayConfig| {
        for pattern in config.routes.keys() {
            counters
                .entry(pattern.clone())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)));
        }
        for (pattern, rc) in &config.route_configs {
            if rc.alternative_backends.is_some() {
                counters
                    .entry(format!("{}#alt", pattern))
                    .or_insert_with(|| Arc::new(AtomicUsize::new(0)));
            }
        }
    };
    add_scope(global);
    for config in tenant_configs.values() {
        add_scope(config);
    }
    counters
}

/// Health targets: the global URL when present, otherwise the first tenant
/// URL that materialized the backend.
fn health_targets(
    global: &GatewayConfig,
    tenant_configs: &HashMap<String, Arc<GatewayConfig>>,
) -> Vec<(String, String)> {
    let mut targets: HashMap<String, String> = HashMap::new();
    for id in known_backend_ids(global, tenant_configs) {
        if let Some(url) = global.backend_url(&id) {
            targets.insert(id, url);
            continue;
        }
        let mut tenant_ids: Vec<&String> = tenant_configs.keys().collect();
        tenant_ids.sort();
        for tenant in tenant_ids {
            if let Some(url) = tenant_configs[tenant].backend_url(&id) {
                targets.insert(id.clone(), url);
                break;
            }
        }
    }
    let mut targets: Vec<(String, String)> = targets.into_iter().collect();
    targets.sort();
    targets
}
