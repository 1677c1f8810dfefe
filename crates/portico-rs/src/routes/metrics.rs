//! JSON metrics endpoint.
//!
//! Served at the configured `metrics_endpoint` (default `/metrics`) when
//! metrics are enabled globally or by any tenant (the flag is monotonic).

use crate::services::dispatcher::RequestDispatcher;
use actix_web::{web, HttpResponse, Result};
use std::sync::Arc;

/// Renders the metrics snapshot: per-backend request/error counts and
/// latency summaries joined with current health, plus gateway totals and
/// composite / circuit-breaker / health-check counters.
pub async fn metrics_endpoint(
    dispatcher: web::Data<Arc<RequestDispatcher>>,
) -> Result<HttpResponse> {
    let dispatcher = dispatcher.get_ref();
    let snapshot = dispatcher
        .metrics()
        .snapshot(&|backend| dispatcher.is_healthy(backend));
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Registers the metrics route when enabled. Call before the proxy
/// catch-all.
pub fn configure_metrics(cfg: &mut web::ServiceConfig, dispatcher: &Arc<RequestDispatcher>) {
    if dispatcher.metrics_route_enabled() {
        let path = dispatcher.global_config().metrics_endpoint.clone();
        cfg.route(&path, web::get().to(metrics_endpoint));
    }
}
