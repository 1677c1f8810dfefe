//! Tenant configuration overlays and the global/tenant merge.
//!
//! A tenant overlay is a partial mirror of [`GatewayConfig`]: every scalar is
//! optional and every map defaults to empty, so "unset" is distinguishable
//! from a zero value. Merging produces a full `GatewayConfig` that the rest
//! of the gateway consumes without knowing whether a tenant was involved.

use crate::models::config::{
    BackendConfig, CircuitBreakerSettings, CompositeRoute, GatewayConfig, RouteConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Partial per-tenant configuration.
///
/// Merge semantics, per section:
/// - maps: per-key replace (tenant keys win, other global keys remain)
/// - scalars: tenant value wins when present
/// - `cache_enabled` / `metrics_enabled`: monotonic OR; a tenant can opt
///   in when the global is off but can never opt out
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TenantOverlay {
    #[serde(default)]
    pub backend_services: HashMap<String, String>,

    #[serde(default)]
    pub routes: HashMap<String, String>,

    #[serde(default)]
    pub route_configs: HashMap<String, RouteConfig>,

    #[serde(default)]
    pub backend_configs: HashMap<String, BackendConfig>,

    #[serde(default)]
    pub composite_routes: HashMap<String, CompositeRoute>,

    #[serde(default)]
    pub backend_circuit_breakers: HashMap<String, CircuitBreakerSettings>,

    /// Tenant flag values; override global flags per key.
    #[serde(default)]
    pub feature_flags: HashMap<String, bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,

    /// Tenant TTL (seconds). Only takes effect for requests carrying this
    /// tenant's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
}

impl TenantOverlay {
    /// True when the overlay carries nothing; merging it is the identity.
    pub fn is_empty(&self) -> bool {
        *self == TenantOverlay::default()
    }
}

/// Merges a tenant overlay onto the global configuration.
///
/// The result is computed once per tenant at registration time and cached;
/// merging the same overlay twice is idempotent, and merging an empty
/// overlay returns a config equivalent to the global one.
pub fn merge(global: &GatewayConfig, overlay: &TenantOverlay) -> GatewayConfig {
    let mut effective = global.clone();

    replace_keys(&mut effective.backend_services, &overlay.backend_services);
    replace_keys(&mut effective.routes, &overlay.routes);
    replace_keys(&mut effective.route_configs, &overlay.route_configs);
    replace_keys(&mut effective.backend_configs, &overlay.backend_configs);
    replace_keys(&mut effective.composite_routes, &overlay.composite_routes);
    replace_keys(
        &mut effective.backend_circuit_breakers,
        &overlay.backend_circuit_breakers,
    );
    replace_keys(&mut effective.feature_flags.flags, &overlay.feature_flags);

    if overlay.default_backend.is_some() {
        effective.default_backend = overlay.default_backend.clone();
    }
    if let Some(timeout) = overlay.request_timeout {
        effective.request_timeout = timeout;
    }
    if overlay.cache_ttl.is_some() {
        effective.cache_ttl = overlay.cache_ttl;
    }

    // Monotonic opt-in booleans: global on means on for everyone.
    effective.cache_enabled = or_merge(global.cache_enabled, overlay.cache_enabled);
    effective.metrics_enabled = or_merge(global.metrics_enabled, overlay.metrics_enabled);

    // Per-tenant configs do not nest further tenants.
    effective.tenants = HashMap::new();

    effective
}

fn replace_keys<V: Clone>(base: &mut HashMap<String, V>, overlay: &HashMap<String, V>) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

fn or_merge(global: Option<bool>, tenant: Option<bool>) -> Option<bool> {
    match (global, tenant) {
        (None, None) => None,
        (g, t) => Some(g.unwrap_or(false) || t.unwrap_or(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overlay_is_identity() {
        let mut global = GatewayConfig::default();
        global
            .backend_services
            .insert("api".into(), "http://127.0.0.1:9000".into());
        global.cache_enabled = Some(true);

        let merged = merge(&global, &TenantOverlay::default());
        assert_eq!(merged, global);
    }

    #[test]
    fn monotonic_or_cannot_opt_out() {
        let global = GatewayConfig {
            cache_enabled: Some(true),
            ..GatewayConfig::default()
        };
        let overlay = TenantOverlay {
            cache_enabled: Some(false),
            ..TenantOverlay::default()
        };
        assert_eq!(merge(&global, &overlay).cache_enabled, Some(true));
    }

    #[test]
    fn tenant_can_opt_in() {
        let overlay = TenantOverlay {
            metrics_enabled: Some(true),
            ..TenantOverlay::default()
        };
        assert_eq!(
            merge(&GatewayConfig::default(), &overlay).metrics_enabled,
            Some(true)
        );
    }
}
