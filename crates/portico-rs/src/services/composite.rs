//! Composite routes: parallel fan-out with response merging.
//!
//! One incoming request is replayed to every backend in the configured
//! list. Under `first-success` the first 2xx completion wins and the
//! remaining fan-out futures are cancelled; under `combine` all completions
//! are collected and handed to a registered endpoint transform, falling
//! back to first-success order when none matches. GET results are served
//! from and admitted to the response cache when the effective tenant config
//! enables caching.

use crate::models::config::{CompositeRoute, GatewayConfig, MergeStrategy};
use crate::models::error::GatewayError;
use crate::services::cache::{fingerprint, ResponseCache};
use crate::services::health::HealthMonitor;
use crate::services::metrics::GatewayMetrics;
use crate::services::proxy::{ForwardParts, ProxyRegistry, UpstreamResult};
use crate::utils::pattern::CompiledPattern;
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Upper bound on the buffered fan-out body.
const MAX_COMPOSITE_BODY: usize = 1024 * 1024;

/// Response headers not relayed back to the client.
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "keep-alive"];

/// One backend's contribution to a composite response.
pub struct BackendResponse {
    pub backend: String,
    pub result: UpstreamResult,
}

/// A synthesized merged response.
pub struct MergedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

/// Named endpoint transform for composite routes.
///
/// `prepare` may rewrite the outbound request per backend (method, query);
/// `merge` synthesizes the client response from the collected per-backend
/// responses, returning `None` to fall back to first-success semantics.
pub trait EndpointTransform: Send + Sync {
    fn prepare(&self, _backend: &str, parts: &ForwardParts) -> ForwardParts {
        parts.clone()
    }

    fn merge(&self, responses: &[BackendResponse]) -> Option<MergedResponse>;
}

/// Pattern-keyed registry of endpoint transforms.
#[derive(Default)]
pub struct TransformerRegistry {
    entries: RwLock<Vec<(CompiledPattern, Arc<dyn EndpointTransform>)>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        pattern: &str,
        transform: Arc<dyn EndpointTransform>,
    ) -> Result<(), GatewayError> {
        let compiled = CompiledPattern::compile(pattern).map_err(|e| GatewayError::Config {
            message: format!("invalid transformer pattern: {}", e),
        })?;
        let mut entries = self.entries.write().unwrap();
        entries.push((compiled, transform));
        entries.sort_by(|a, b| b.0.specificity().cmp(&a.0.specificity()));
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<dyn EndpointTransform>> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, t)| Arc::clone(t))
    }
}

/// Executes composite routes against the shared proxy registry and cache.
pub struct CompositeExecutor {
    registry: Arc<ProxyRegistry>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthMonitor>,
    metrics: Arc<GatewayMetrics>,
    transformers: Arc<TransformerRegistry>,
}

impl CompositeExecutor {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        cache: Arc<ResponseCache>,
        health: Arc<HealthMonitor>,
        metrics: Arc<GatewayMetrics>,
        transformers: Arc<TransformerRegistry>,
    ) -> Self {
        Self {
            registry,
            cache,
            health,
            metrics,
            transformers,
        }
    }

    pub async fn handle(
        &self,
        route: &CompositeRoute,
        effective: &GatewayConfig,
        tenant: Option<&str>,
        parts: &ForwardParts,
        body: Bytes,
        deadline: Duration,
    ) -> Result<HttpResponse, GatewayError> {
        self.metrics.composite_requests.fetch_add(1, Ordering::Relaxed);

        if body.len() > MAX_COMPOSITE_BODY {
            return Err(GatewayError::BodyTooLarge {
                limit: MAX_COMPOSITE_BODY,
            });
        }

        let is_get = parts.method == reqwest::Method::GET;
        let cacheable = is_get && effective.cache_active();
        let key = cache_key(parts);

        if cacheable {
            if let Some(entry) = self.cache.get(&key) {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("composite cache hit for {}", parts.path);
                return Ok(entry_response(entry.status, &entry.headers, entry.body));
            }
            self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let transform = self.transformers.lookup(&parts.path);

        let responses = match route.strategy {
            MergeStrategy::FirstSuccess => {
                self.fan_out_first_success(route, tenant, parts, &body, deadline, transform.as_deref())
                    .await
            }
            MergeStrategy::Combine => {
                self.fan_out_all(route, tenant, parts, &body, deadline, transform.as_deref())
                    .await
            }
        };

        let (status, headers, merged_body) = match route.strategy {
            MergeStrategy::Combine => {
                if let Some(transform) = &transform {
                    if let Some(merged) = transform.merge(&responses) {
                        let headers = vec![(
                            "content-type".to_string(),
                            merged.content_type.into_bytes(),
                        )];
                        (merged.status, headers, merged.body)
                    } else {
                        first_success(&responses, route)?
                    }
                } else {
                    first_success(&responses, route)?
                }
            }
            MergeStrategy::FirstSuccess => first_success(&responses, route)?,
        };

        if cacheable {
            self.cache.insert(
                key,
                parts.method.as_str(),
                status,
                headers.clone(),
                merged_body.clone(),
                Duration::from_secs(effective.cache_ttl_secs()),
            );
        }

        Ok(entry_response(status, &headers, merged_body))
    }

    /// Launches one forward per backend and returns as soon as a 2xx
    /// completes; dropping the stream cancels the peers.
    async fn fan_out_first_success(
        &self,
        route: &CompositeRoute,
        tenant: Option<&str>,
        parts: &ForwardParts,
        body: &Bytes,
        deadline: Duration,
        transform: Option<&dyn EndpointTransform>,
    ) -> Vec<BackendResponse> {
        let mut futures = FuturesUnordered::new();
        for backend in &route.backends {
            futures.push(self.forward_one(backend, tenant, parts, body, deadline, transform));
        }

        let mut collected = Vec::with_capacity(route.backends.len());
        while let Some(response) = futures.next().await {
            if response.result.is_2xx() {
                collected.push(response);
                // Remaining fan-out futures are cancelled here.
                drop(futures);
                return collected;
            }
            collected.push(response);
        }
        collected
    }

    /// Awaits every backend; merge order follows the configured list.
    async fn fan_out_all(
        &self,
        route: &CompositeRoute,
        tenant: Option<&str>,
        parts: &ForwardParts,
        body: &Bytes,
        deadline: Duration,
        transform: Option<&dyn EndpointTransform>,
    ) -> Vec<BackendResponse> {
        let futures = route
            .backends
            .iter()
            .map(|backend| self.forward_one(backend, tenant, parts, body, deadline, transform));
        let mut responses = futures::future::join_all(futures).await;
        let order: Vec<&String> = route.backends.iter().collect();
        responses.sort_by_key(|r| order.iter().position(|id| **id == r.backend));
        responses
    }

    async fn forward_one(
        &self,
        backend: &str,
        tenant: Option<&str>,
        parts: &ForwardParts,
        body: &Bytes,
        deadline: Duration,
        transform: Option<&dyn EndpointTransform>,
    ) -> BackendResponse {
        let Some(proxy) = self.registry.proxy_for(backend, tenant) else {
            warn!("composite backend {} has no configured URL", backend);
            return BackendResponse {
                backend: backend.to_string(),
                result: UpstreamResult::ConnectError("backend has no configured URL".into()),
            };
        };

        let prepared;
        let effective_parts = match transform {
            Some(t) => {
                prepared = t.prepare(backend, parts);
                &prepared
            }
            None => parts,
        };

        let started = std::time::Instant::now();
        let result = proxy.forward(effective_parts, body.clone(), deadline).await;
        self.health.mark_request(backend);
        self.metrics.record_backend_request(
            backend,
            result.is_2xx(),
            started.elapsed(),
        );
        BackendResponse {
            backend: backend.to_string(),
            result,
        }
    }
}

fn cache_key(parts: &ForwardParts) -> String {
    let url = match &parts.query {
        Some(q) => format!("{}?{}", parts.path, q),
        None => parts.path.clone(),
    };
    let accept = header_str(parts, "accept");
    let accept_encoding = header_str(parts, "accept-encoding");
    fingerprint(parts.method.as_str(), &url, &accept, &accept_encoding)
}

fn header_str(parts: &ForwardParts, name: &str) -> String {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// First backend in configured order with a 2xx response; 502 otherwise.
#[allow(clippy::type_complexity)]
fn first_success(
    responses: &[BackendResponse],
    route: &CompositeRoute,
) -> Result<(u16, Vec<(String, Vec<u8>)>, Bytes), GatewayError> {
    for backend in &route.backends {
        if let Some(response) = responses.iter().find(|r| r.backend == *backend) {
            if let UpstreamResult::Response {
                status,
                headers,
                body,
            } = &response.result
            {
                if (200..300).contains(status) {
                    let headers = headers
                        .iter()
                        .filter(|(name, _)| {
                            !SKIP_RESPONSE_HEADERS
                                .iter()
                                .any(|skip| name.as_str().eq_ignore_ascii_case(skip))
                        })
                        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                        .collect();
                    return Ok((*status, headers, body.clone()));
                }
            }
        }
    }
    Err(GatewayError::CompositeFailed {
        pattern: route.pattern.clone(),
    })
}

fn entry_response(status: u16, headers: &[(String, Vec<u8>)], body: Bytes) -> HttpResponse {
    let mut builder = HttpResponse::build(
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    for (name, value) in headers {
        if let Ok(value) = actix_web::http::header::HeaderValue::from_bytes(value) {
            builder.insert_header((name.as_str(), value));
        }
    }
    builder.body(body)
}
