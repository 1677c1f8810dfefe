//! Configuration validation with detailed error reporting.
//!
//! Validation runs once at startup, before any handler is registered. It
//! distinguishes hard errors (the module must not start), warnings (suspect
//! but workable), and recommendations.

use crate::models::config::GatewayConfig;
use crate::models::tenant;
use log::{info, warn};
use std::collections::HashSet;

/// Result of configuration validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }

    /// Logs warnings and recommendations; errors are the caller's to act on.
    pub fn log_non_fatal(&self) {
        for warning in &self.warnings {
            warn!("config warning: {}", warning);
        }
        for rec in &self.recommendations {
            info!("config recommendation: {}", rec);
        }
    }
}

/// Validator for the full configuration, including each tenant's merged view.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the global configuration and every tenant overlay merged
    /// onto it.
    ///
    /// Hard errors:
    /// - a route, composite route, alternative, dry-run or default backend
    ///   referencing an id with no backend entry
    /// - a cyclic `alternative_backend` chain
    /// - a non-empty backend URL that is not http(s)
    /// - debug endpoints requiring auth with an empty token
    /// - a `global_timeout` value (documented but never consumed; rejected
    ///   here rather than silently accepted)
    pub fn validate(config: &GatewayConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_scoped(config, None, &mut result);

        for (tenant_id, overlay) in &config.tenants {
            let effective = tenant::merge(config, overlay);
            Self::validate_scoped(&effective, Some(tenant_id), &mut result);
        }

        if config.global_timeout.is_some() {
            result.add_error(
                "global_timeout is accepted by the schema but not consumed in request \
                 handling; remove it (use request_timeout and per-route timeouts)"
                    .to_string(),
            );
        }

        if config.debug_endpoints.require_auth && config.debug_endpoints.auth_token.is_empty() {
            result.add_error(
                "debug_endpoints.require_auth is set but auth_token is empty".to_string(),
            );
        }

        if config.cache_enabled == Some(true) && config.cache_ttl.unwrap_or(0) == 0 {
            result.add_warning(
                "cache_enabled is set with cache_ttl 0; no entry will ever be inserted"
                    .to_string(),
            );
        }

        if config.health_check.enabled && config.health_check.interval == 0 {
            result.add_error("health_check.interval must be greater than 0".to_string());
        }

        if !config.debug_endpoints.require_auth && config.debug_endpoints.enabled {
            result.add_recommendation(
                "debug endpoints are enabled without authentication".to_string(),
            );
        }

        result
    }

    fn validate_scoped(
        config: &GatewayConfig,
        tenant: Option<&str>,
        result: &mut ValidationResult,
    ) {
        let scope = |msg: String| match tenant {
            Some(t) => format!("tenant {}: {}", t, msg),
            None => msg,
        };

        let known: HashSet<&str> = config
            .backend_services
            .keys()
            .map(String::as_str)
            .chain(config.backend_configs.keys().map(String::as_str))
            .collect();

        for id in config.referenced_backend_ids() {
            if !known.contains(id.as_str()) {
                result.add_error(scope(format!(
                    "backend '{}' is referenced but has no backend entry",
                    id
                )));
            }
        }

        for (id, url) in &config.backend_services {
            if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error(scope(format!(
                    "backend '{}' URL must start with http:// or https://",
                    id
                )));
            }
            if url.is_empty() && tenant.is_some() {
                result.add_warning(scope(format!(
                    "backend '{}' still has no URL after the overlay",
                    id
                )));
            }
        }

        for (id, backend) in &config.backend_configs {
            if let Some(url) = &backend.url {
                if !url.is_empty()
                    && !url.starts_with("http://")
                    && !url.starts_with("https://")
                {
                    result.add_error(scope(format!(
                        "backend_configs['{}'].url must start with http:// or https://",
                        id
                    )));
                }
            }
        }

        for (pattern, rc) in &config.route_configs {
            if rc.timeout == Some(0) {
                result.add_warning(scope(format!(
                    "route '{}' has a timeout of 0 seconds",
                    pattern
                )));
            }
            if rc.dry_run && rc.dry_run_backend.is_none() && rc.alternative_backend.is_none() {
                result.add_error(scope(format!(
                    "route '{}' enables dry_run without dry_run_backend or alternative_backend",
                    pattern
                )));
            }
        }

        for (name, route) in &config.composite_routes {
            if route.backends.is_empty() {
                result.add_error(scope(format!(
                    "composite route '{}' has an empty backend list",
                    name
                )));
            }
            if route.pattern.is_empty() || !route.pattern.starts_with('/') {
                result.add_error(scope(format!(
                    "composite route '{}' pattern must start with '/'",
                    name
                )));
            }
        }

        Self::check_alternative_cycles(config, tenant, result);
    }

    /// Follows backend-level `alternative_backend` chains; a repeated id
    /// means the substitution could loop forever at request time.
    fn check_alternative_cycles(
        config: &GatewayConfig,
        tenant: Option<&str>,
        result: &mut ValidationResult,
    ) {
        for start in config.backend_configs.keys() {
            let mut seen = HashSet::new();
            let mut current = start.clone();
            while let Some(next) = config
                .backend_configs
                .get(&current)
                .and_then(|b| b.alternative_backend.clone())
            {
                if !seen.insert(current.clone()) {
                    let msg = format!(
                        "cyclic alternative_backend chain involving backend '{}'",
                        start
                    );
                    let scoped = match tenant {
                        Some(t) => format!("tenant {}: {}", t, msg),
                        None => msg,
                    };
                    if !result.errors.contains(&scoped) {
                        result.add_error(scoped);
                    }
                    break;
                }
                current = next;
            }
        }
    }
}
