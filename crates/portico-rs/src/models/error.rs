//! Gateway error types with HTTP response mapping.
//!
//! Every per-request failure is represented here and converted to an HTTP
//! status plus a short JSON diagnostic body. Bodies never leak backend URLs
//! or internal detail; the detail goes to logs and events.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Errors produced while dispatching or forwarding a request.
///
/// The `Display` output (via `thiserror`) is intended for logs. Client-facing
/// bodies are built in [`GatewayError::error_response`] from fixed class
/// phrases so that upstream addresses and config internals stay private.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The route requires a tenant id header and the request did not carry one.
    #[error("missing required tenant header {header}")]
    TenantRequired { header: String },

    /// No route (after feature-flag substitution) maps to the request path.
    #[error("no matching route for path: {path}")]
    RouteNotFound { path: String },

    /// The circuit breaker for the target backend is open.
    #[error("circuit open for backend {backend}")]
    CircuitOpen { backend: String },

    /// The upstream did not answer within the effective deadline.
    #[error("upstream timed out after {timeout_secs}s (backend {backend})")]
    Timeout { backend: String, timeout_secs: u64 },

    /// DNS failure, connection refused, TLS failure, or any transport error.
    #[error("upstream connection failed for backend {backend}: {message}")]
    Upstream { backend: String, message: String },

    /// A composite route finished without any acceptable backend response.
    #[error("composite route {pattern} produced no successful response")]
    CompositeFailed { pattern: String },

    /// The buffered request or response body exceeded the configured limit.
    #[error("body larger than {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Configuration problem discovered at init or registration time.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl GatewayError {
    /// Short machine-readable kind used in response bodies and events.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::TenantRequired { .. } => "tenant-missing",
            GatewayError::RouteNotFound { .. } => "route-not-found",
            GatewayError::CircuitOpen { .. } => "circuit-open",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Upstream { .. } => "upstream",
            GatewayError::CompositeFailed { .. } => "composite-failed",
            GatewayError::BodyTooLarge { .. } => "body-too-large",
            GatewayError::Config { .. } => "config",
        }
    }

    /// Client-facing class phrase. Deliberately free of internal detail.
    fn class_phrase(&self) -> &'static str {
        match self {
            GatewayError::TenantRequired { .. } => "Tenant identifier required",
            GatewayError::RouteNotFound { .. } => "Route not found",
            GatewayError::CircuitOpen { .. } => "Backend service unavailable",
            GatewayError::Timeout { .. } => "Gateway timeout",
            GatewayError::Upstream { .. } => "Backend connection failed",
            GatewayError::CompositeFailed { .. } => "No backend produced a usable response",
            GatewayError::BodyTooLarge { .. } => "Request body too large",
            GatewayError::Config { .. } => "Internal server error",
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::TenantRequired { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::CompositeFailed { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.class_phrase(),
            "type": self.kind(),
        }))
    }
}
