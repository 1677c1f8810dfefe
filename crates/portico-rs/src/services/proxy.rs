//! Materialized per-backend reverse-proxy handlers.
//!
//! For every (backend, tenant) pair the registry holds a [`BackendProxy`]
//! bound to the effective base URL, with the rewrite pipeline applied before
//! each forward: path rewrite (endpoint overrides first), header removals,
//! header sets, host policy. Every outbound interaction returns a tagged
//! [`UpstreamResult`]; classification into circuit-breaker outcomes happens
//! here so the dispatcher and the composite handler agree on semantics.

use crate::models::config::{BackendConfig, GatewayConfig, HeaderRewrite, HostnameHandling, PathRewrite};
use crate::services::circuit_breaker::Outcome;
use crate::utils::path::{join_url, rewrite_path};
use crate::utils::pattern::CompiledPattern;
use actix_web::http::header::HeaderMap as ActixHeaderMap;
use actix_web::http::Method as ActixMethod;
use actix_web::web::Bytes;
use actix_web::HttpRequest;
use ahash::HashMap as AHashMap;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Headers never forwarded upstream.
const SKIP_HEADERS: &[&str] = &["host", "connection", "upgrade", "proxy-connection"];

/// Tagged result of one outbound interaction.
#[derive(Debug)]
pub enum UpstreamResult {
    /// The backend answered; 5xx responses are included here and classified
    /// as failures for the circuit breaker.
    Response {
        status: u16,
        headers: HeaderMap,
        body: Bytes,
    },
    /// DNS failure, refused connection, TLS failure, or a broken body read.
    ConnectError(String),
    /// The effective deadline elapsed.
    Timeout,
}

impl UpstreamResult {
    /// Circuit-breaker view of this result.
    pub fn outcome(&self) -> Outcome {
        match self {
            UpstreamResult::Response { status, .. } if *status >= 500 => Outcome::Failure,
            UpstreamResult::Response { .. } => Outcome::Success,
            UpstreamResult::ConnectError(_) => Outcome::Failure,
            UpstreamResult::Timeout => Outcome::Timeout,
        }
    }

    pub fn is_2xx(&self) -> bool {
        matches!(self, UpstreamResult::Response { status, .. } if (200..300).contains(status))
    }
}

/// Request pieces extracted once from the inbound request so they can be
/// replayed across fan-out targets and retries.
#[derive(Debug, Clone)]
pub struct ForwardParts {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub original_host: Option<String>,
}

impl ForwardParts {
    /// Builds the replayable parts from an inbound actix request. Hop-by-hop
    /// headers are stripped; the tenant id header passes through unchanged.
    pub fn from_request(req: &HttpRequest) -> Self {
        let query = if req.query_string().is_empty() {
            None
        } else {
            Some(req.query_string().to_string())
        };
        Self {
            method: convert_method(req.method()),
            path: req.path().to_string(),
            query,
            headers: convert_headers(req.headers()),
            original_host: req
                .headers()
                .get("host")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }
}

/// Converts an actix method to its reqwest counterpart.
pub fn convert_method(method: &ActixMethod) -> Method {
    Method::from_bytes(method.as_str().as_bytes()).unwrap_or(Method::GET)
}

/// Converts and filters inbound headers for upstream forwarding.
pub fn convert_headers(original: &ActixHeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(original.len());
    for (key, value) in original {
        let key_str = key.as_str();
        if SKIP_HEADERS.iter().any(|skip| key_str.eq_ignore_ascii_case(skip)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }
    headers
        .entry("user-agent")
        .or_insert_with(|| HeaderValue::from_static(concat!("portico-rs/", env!("CARGO_PKG_VERSION"))));
    headers
}

/// A reverse-proxy handler bound to one backend's effective base URL.
pub struct BackendProxy {
    pub backend_id: String,
    pub base_url: String,
    path_rewrite: Option<PathRewrite>,
    header_rewrite: Option<HeaderRewrite>,
    /// Endpoint-specific overrides, most specific pattern first.
    endpoints: Vec<(CompiledPattern, PathRewrite)>,
    max_retries: u32,
    retry_delay: Duration,
    client: Client,
}

impl BackendProxy {
    fn build(
        backend_id: &str,
        base_url: String,
        config: Option<&BackendConfig>,
        client: Client,
    ) -> Self {
        let mut endpoints = Vec::new();
        if let Some(cfg) = config {
            for (pattern, rule) in &cfg.endpoints {
                match CompiledPattern::compile(pattern) {
                    Ok(compiled) => endpoints.push((compiled, rule.clone())),
                    Err(e) => warn!(
                        "ignoring endpoint override '{}' on backend {}: {}",
                        pattern, backend_id, e
                    ),
                }
            }
            endpoints.sort_by(|a, b| b.0.specificity().cmp(&a.0.specificity()));
        }
        Self {
            backend_id: backend_id.to_string(),
            base_url,
            path_rewrite: config.and_then(|c| c.path_rewriting.clone()),
            header_rewrite: config.and_then(|c| c.header_rewriting.clone()),
            endpoints,
            max_retries: config.map(|c| c.max_retries).unwrap_or(0),
            retry_delay: Duration::from_millis(config.map(|c| c.retry_delay).unwrap_or(100)),
            client,
        }
    }

    /// Applies the path rewrite pipeline: the first matching endpoint
    /// override wins, otherwise the backend-wide rule, otherwise identity.
    pub fn rewrite(&self, path: &str) -> String {
        for (pattern, rule) in &self.endpoints {
            if pattern.matches(path) {
                return rewrite_path(path, rule);
            }
        }
        match &self.path_rewrite {
            Some(rule) => rewrite_path(path, rule),
            None => path.to_string(),
        }
    }

    fn apply_header_rewrite(&self, headers: &mut HeaderMap, original_host: Option<&str>) {
        let Some(rewrite) = &self.header_rewrite else {
            return;
        };
        for name in &rewrite.remove_headers {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.remove(name);
            }
        }
        for (name, value) in &rewrite.set_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        match rewrite.hostname_handling {
            HostnameHandling::UseBackend => {}
            HostnameHandling::PreserveOriginal => {
                if let Some(host) = original_host {
                    if let Ok(value) = HeaderValue::from_str(host) {
                        headers.insert(HOST, value);
                    }
                }
            }
            HostnameHandling::UseCustom => {
                if let Some(host) = &rewrite.custom_hostname {
                    if let Ok(value) = HeaderValue::from_str(host) {
                        headers.insert(HOST, value);
                    }
                }
            }
        }
    }

    /// Forwards one request through the rewrite pipeline.
    ///
    /// The deadline applies per attempt; only connect-level failures are
    /// retried (`max_retries` times with `retry_delay` between attempts).
    pub async fn forward(
        &self,
        parts: &ForwardParts,
        body: Bytes,
        deadline: Duration,
    ) -> UpstreamResult {
        let path = self.rewrite(&parts.path);
        let url = join_url(&self.base_url, &path, parts.query.as_deref());

        let mut headers = parts.headers.clone();
        self.apply_header_rewrite(&mut headers, parts.original_host.as_deref());

        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(self.retry_delay).await;
                warn!("retry {} for backend {} ({})", attempt, self.backend_id, url);
            } else {
                debug!("forwarding to backend {} ({})", self.backend_id, url);
            }

            let request = self
                .client
                .request(parts.method.clone(), &url)
                .headers(headers.clone())
                .body(body.clone());

            match timeout(deadline, request.send()).await {
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    match timeout(deadline, response.bytes()).await {
                        Ok(Ok(bytes)) => {
                            return UpstreamResult::Response {
                                status,
                                headers,
                                body: bytes,
                            }
                        }
                        Ok(Err(e)) => return UpstreamResult::ConnectError(e.to_string()),
                        Err(_) => return UpstreamResult::Timeout,
                    }
                }
                Ok(Err(e)) => {
                    if attempt + 1 < attempts {
                        continue;
                    }
                    return UpstreamResult::ConnectError(e.to_string());
                }
                Err(_) => return UpstreamResult::Timeout,
            }
        }
        UpstreamResult::ConnectError("retry attempts exhausted".to_string())
    }
}

/// Id-indexed proxy handlers, per tenant plus the global scope.
///
/// Lookup order: the tenant's materialized proxy, then the global one. A
/// backend whose effective config has no URL gets no proxy in that scope.
pub struct ProxyRegistry {
    proxies: AHashMap<(String, String), Arc<BackendProxy>>,
}

const GLOBAL_SCOPE: &str = "";

impl ProxyRegistry {
    pub fn build(
        global: &GatewayConfig,
        tenant_configs: &HashMap<String, Arc<GatewayConfig>>,
        client: &Client,
    ) -> Self {
        let mut proxies = AHashMap::default();
        Self::materialize(&mut proxies, GLOBAL_SCOPE, global, client);
        for (tenant, config) in tenant_configs {
            Self::materialize(&mut proxies, tenant, config, client);
        }
        Self { proxies }
    }

    fn materialize(
        proxies: &mut AHashMap<(String, String), Arc<BackendProxy>>,
        scope: &str,
        config: &GatewayConfig,
        client: &Client,
    ) {
        let mut ids: Vec<&String> = config
            .backend_services
            .keys()
            .chain(config.backend_configs.keys())
            .collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            let Some(url) = config.backend_url(id) else {
                continue;
            };
            let proxy = BackendProxy::build(
                id,
                url,
                config.backend_configs.get(id),
                client.clone(),
            );
            proxies.insert((scope.to_string(), id.clone()), Arc::new(proxy));
        }
    }

    pub fn proxy_for(&self, backend: &str, tenant: Option<&str>) -> Option<Arc<BackendProxy>> {
        if let Some(tenant) = tenant {
            let key = (tenant.to_string(), backend.to_string());
            if let Some(proxy) = self.proxies.get(&key) {
                return Some(Arc::clone(proxy));
            }
        }
        self.proxies
            .get(&(GLOBAL_SCOPE.to_string(), backend.to_string()))
            .cloned()
    }
}
