//! Debug introspection endpoints.
//!
//! JSON surfaces under the configured base path (default `/debug`):
//! `{base}/info`, `{base}/backends`, `{base}/flags`,
//! `{base}/circuit-breakers`, `{base}/health-checks`. With `require_auth`
//! set, every surface demands `Authorization: Bearer <auth_token>` and
//! answers 401 otherwise.

use crate::services::dispatcher::RequestDispatcher;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

fn authorized(req: &HttpRequest, dispatcher: &RequestDispatcher) -> bool {
    let settings = &dispatcher.global_config().debug_endpoints;
    if !settings.require_auth {
        return true;
    }
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == settings.auth_token)
        .unwrap_or(false)
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({
        "error": "Authorization required",
        "type": "unauthorized",
    }))
}

/// Module name, configured backends, and routes.
pub async fn info(
    req: HttpRequest,
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    if !authorized(&req, &dispatcher) {
        return Ok(unauthorized());
    }
    let config = dispatcher.global_config();
    Ok(HttpResponse::Ok().json(json!({
        "module": "portico",
        "version": env!("CARGO_PKG_VERSION"),
        "backend_services": config.backend_services,
        "routes": config.routes,
        "tenants": dispatcher.tenant_ids(),
    })))
}

/// Per-backend configured URL and current health.
pub async fn backends(
    req: HttpRequest,
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    if !authorized(&req, &dispatcher) {
        return Ok(unauthorized());
    }
    let config = dispatcher.global_config();
    let mut ids: Vec<&String> = config
        .backend_services
        .keys()
        .chain(config.backend_configs.keys())
        .collect();
    ids.sort();
    ids.dedup();

    let body: serde_json::Map<String, serde_json::Value> = ids
        .into_iter()
        .map(|id| {
            (
                id.clone(),
                json!({
                    "url": config.backend_url(id),
                    "healthy": dispatcher.is_healthy(id),
                }),
            )
        })
        .collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Global flag values plus known tenant overrides.
pub async fn flags(
    req: HttpRequest,
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    if !authorized(&req, &dispatcher) {
        return Ok(unauthorized());
    }
    let config = dispatcher.global_config();
    let tenants: serde_json::Map<String, serde_json::Value> = config
        .tenants
        .iter()
        .filter(|(_, overlay)| !overlay.feature_flags.is_empty())
        .map(|(id, overlay)| (id.clone(), json!(overlay.feature_flags)))
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "enabled": config.feature_flags.enabled,
        "global": config.feature_flags.flags,
        "tenants": tenants,
    })))
}

/// Per-backend circuit-breaker state and counters.
pub async fn circuit_breakers(
    req: HttpRequest,
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    if !authorized(&req, &dispatcher) {
        return Ok(unauthorized());
    }
    Ok(HttpResponse::Ok().json(dispatcher.breaker_snapshots()))
}

/// Per-backend probe history and last error.
pub async fn health_checks(
    req: HttpRequest,
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    if !authorized(&req, &dispatcher) {
        return Ok(unauthorized());
    }
    Ok(HttpResponse::Ok().json(dispatcher.health_snapshots()))
}

/// Registers the debug scope when enabled. Call before the proxy
/// catch-all.
pub fn configure_debug(cfg: &mut web::ServiceConfig, dispatcher: &Arc<RequestDispatcher>) {
    let settings = &dispatcher.global_config().debug_endpoints;
    if !settings.enabled {
        return;
    }
    cfg.service(
        web::scope(&settings.base_path)
            .route("/info", web::get().to(info))
            .route("/backends", web::get().to(backends))
            .route("/flags", web::get().to(flags))
            .route("/circuit-breakers", web::get().to(circuit_breakers))
            .route("/health-checks", web::get().to(health_checks)),
    );
}
