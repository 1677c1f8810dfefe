//! Structured gateway events.
//!
//! Event names are part of the compatibility surface; observers key off them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub const MODULE_STARTED: &str = "module.started";
pub const MODULE_STOPPED: &str = "module.stopped";
pub const PROXY_STARTED: &str = "proxy.started";
pub const PROXY_STOPPED: &str = "proxy.stopped";
pub const REQUEST_RECEIVED: &str = "request.received";
pub const REQUEST_PROXIED: &str = "request.proxied";
pub const REQUEST_FAILED: &str = "request.failed";
pub const LOADBALANCE_DECISION: &str = "loadbalance.decision";
pub const LOADBALANCE_ROUNDROBIN: &str = "loadbalance.roundrobin";
pub const BACKEND_HEALTHY: &str = "backend.healthy";
pub const BACKEND_UNHEALTHY: &str = "backend.unhealthy";
pub const BACKEND_ADDED: &str = "backend.added";
pub const BACKEND_REMOVED: &str = "backend.removed";
pub const CIRCUITBREAKER_OPEN: &str = "circuitbreaker.open";
pub const CIRCUITBREAKER_HALFOPEN: &str = "circuitbreaker.halfopen";
pub const CIRCUITBREAKER_CLOSED: &str = "circuitbreaker.closed";
pub const FLAG_EVALUATED: &str = "flag.evaluated";

/// A single emitted event.
///
/// Payloads always carry the backend id and tenant id when applicable, a
/// timestamp, and a component-specific data map.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Correlates the events of one request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub data: Value,
}

impl GatewayEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: None,
            tenant: None,
            request_id: None,
            timestamp: Utc::now(),
            duration_ms: None,
            data: Value::Null,
        }
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn tenant(mut self, tenant: Option<&str>) -> Self {
        self.tenant = tenant.map(|t| t.to_string());
        self
    }

    pub fn request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
