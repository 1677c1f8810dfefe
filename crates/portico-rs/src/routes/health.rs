//! Gateway health endpoints.
//!
//! `/health` reports the gateway process together with a routing summary:
//! uptime, configured backends and how many of them the background checker
//! currently considers unhealthy, registered tenants, and route counts.
//! Detailed per-backend state lives under the debug and metrics surfaces.

use crate::services::dispatcher::RequestDispatcher;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// General health check.
///
/// The status degrades to `"degraded"` (still HTTP 200) when any backend is
/// currently marked unhealthy; clients that only care about the process can
/// use `/live` instead.
///
/// # Response Format
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.3.0",
///   "timestamp": "2024-03-15T10:30:00Z",
///   "uptime": 3600,
///   "backends": {"configured": 3, "unhealthy": 0},
///   "tenants": 2,
///   "routes": 5
/// }
/// ```
pub async fn health_check(
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    let config = dispatcher.global_config();
    let unhealthy = dispatcher
        .health_snapshots()
        .iter()
        .filter(|s| s.healthy == Some(false))
        .count();
    let status = if unhealthy > 0 { "degraded" } else { "healthy" };

    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": dispatcher.metrics().uptime_seconds(),
        "backends": {
            "configured": dispatcher.backend_ids().len(),
            "unhealthy": unhealthy,
        },
        "tenants": dispatcher.tenant_ids().len(),
        "routes": config.routes.len() + config.composite_routes.len(),
    })))
}

/// Readiness probe: the gateway is ready once its route tables are built,
/// which holds for any constructed dispatcher. The payload carries the
/// route and tenant counts so orchestration logs show what got wired.
pub async fn readiness_check(
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    let config = dispatcher.global_config();
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "routes": config.routes.len() + config.composite_routes.len(),
        "tenants": dispatcher.tenant_ids().len(),
    })))
}

/// Liveness probe. Deliberately config-free: it only proves the process
/// answers, so backend outages never get the gateway restarted.
pub async fn liveness_check(
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "uptime": dispatcher.metrics().uptime_seconds(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Registers `/health`, `/ready`, and `/live`. The handlers read the
/// dispatcher from app data, so it must be registered on the `App` first.
///
/// These must be configured before the proxy catch-all so they are never
/// shadowed by routing configuration.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}
