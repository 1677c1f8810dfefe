//! Proxy catch-all registration.

use crate::services::dispatcher::RequestDispatcher;
use actix_web::{web, HttpRequest};
use std::sync::Arc;

/// Payload cap for buffered request bodies.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Registers the catch-all proxy route.
///
/// Must be configured last: health, metrics, and debug endpoints are
/// registered before it so reserved paths are never shadowed, and the
/// dispatcher additionally refuses to serve reserved prefixes through the
/// default backend.
pub fn configure_proxy(cfg: &mut web::ServiceConfig, dispatcher: Arc<RequestDispatcher>) {
    cfg.app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
        .service(
            web::resource("/{tail:.*}").to(move |req: HttpRequest, body: web::Bytes| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.handle_request(req, body).await }
            }),
        );
}
