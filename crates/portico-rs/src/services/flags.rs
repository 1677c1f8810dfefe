//! Feature-flag evaluation chain.
//!
//! Evaluators form a weight-ordered chain (lower weight runs earlier). Each
//! returns a three-valued decision: a definite answer stops the chain, a
//! no-decision advances it, and a fatal error aborts the evaluation so the
//! caller's default applies. The built-in file/config-backed evaluator sits
//! at weight 1000 as the fallback.

use crate::models::config::FeatureFlagsConfig;
use crate::models::event::{GatewayEvent, FLAG_EVALUATED};
use crate::services::events::EventBus;
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Weight of the built-in fallback evaluator.
pub const BUILTIN_EVALUATOR_WEIGHT: i32 = 1000;

/// Minimal request view handed to evaluators.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Outcome of one evaluator call.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagDecision {
    /// Definite answer; the chain stops here.
    Decided(bool),
    /// This evaluator abstains; the chain continues.
    NoDecision,
    /// Evaluation must stop; the caller falls back to its default.
    Fatal(String),
}

/// A pluggable flag decider.
///
/// Implementations must be deterministic for fixed inputs within a single
/// request evaluation; the aggregator never retries.
pub trait FlagEvaluator: Send + Sync {
    fn evaluate(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        ctx: &RequestContext,
    ) -> FlagDecision;

    /// Chain position; lower weights run earlier.
    fn weight(&self) -> i32;

    /// Name used in logs and `flag.evaluated` events.
    fn name(&self) -> &str;
}

#[derive(Debug, Default, Deserialize)]
struct FlagFile {
    #[serde(default)]
    flags: HashMap<String, bool>,
    #[serde(default)]
    tenants: HashMap<String, HashMap<String, bool>>,
}

/// Built-in tenant-aware evaluator backed by the configuration file (or a
/// standalone JSON flag file). Tenant entries win over global entries;
/// unknown flags yield no decision.
pub struct FileFlagEvaluator {
    global: HashMap<String, bool>,
    tenants: HashMap<String, HashMap<String, bool>>,
}

impl FileFlagEvaluator {
    pub fn from_config(
        config: &FeatureFlagsConfig,
        tenant_flags: HashMap<String, HashMap<String, bool>>,
    ) -> Self {
        Self {
            global: config.flags.clone(),
            tenants: tenant_flags,
        }
    }

    /// Loads a standalone flag file of the shape
    /// `{"flags": {...}, "tenants": {"t-a": {...}}}`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        let file: FlagFile = serde_json::from_str(&raw)?;
        Ok(Self {
            global: file.flags,
            tenants: file.tenants,
        })
    }
}

impl FlagEvaluator for FileFlagEvaluator {
    fn evaluate(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        _ctx: &RequestContext,
    ) -> FlagDecision {
        if let Some(tenant) = tenant_id {
            if let Some(value) = self.tenants.get(tenant).and_then(|m| m.get(flag_id)) {
                return FlagDecision::Decided(*value);
            }
        }
        match self.global.get(flag_id) {
            Some(value) => FlagDecision::Decided(*value),
            None => FlagDecision::NoDecision,
        }
    }

    fn weight(&self) -> i32 {
        BUILTIN_EVALUATOR_WEIGHT
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Weight-ordered evaluator chain.
pub struct FlagAggregator {
    evaluators: Vec<Arc<dyn FlagEvaluator>>,
    enabled: bool,
    events: Arc<EventBus>,
}

impl FlagAggregator {
    /// Builds the chain, sorting ascending by weight. The sort is stable so
    /// equal-weight evaluators keep registration order.
    pub fn new(
        mut evaluators: Vec<Arc<dyn FlagEvaluator>>,
        enabled: bool,
        events: Arc<EventBus>,
    ) -> Self {
        evaluators.sort_by_key(|e| e.weight());
        Self {
            evaluators,
            enabled,
            events,
        }
    }

    /// Walks the chain per the three-valued protocol. With the subsystem
    /// disabled or every evaluator abstaining, the result is `NoDecision`.
    pub fn evaluate(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        ctx: &RequestContext,
    ) -> FlagDecision {
        if !self.enabled {
            return FlagDecision::NoDecision;
        }
        for evaluator in &self.evaluators {
            match evaluator.evaluate(flag_id, tenant_id, ctx) {
                FlagDecision::Decided(value) => {
                    debug!(
                        "flag {} decided {} by evaluator {}",
                        flag_id,
                        value,
                        evaluator.name()
                    );
                    return FlagDecision::Decided(value);
                }
                FlagDecision::NoDecision => continue,
                FlagDecision::Fatal(reason) => {
                    error!(
                        "flag {} evaluation aborted by {}: {}",
                        flag_id,
                        evaluator.name(),
                        reason
                    );
                    self.events.emit(
                        GatewayEvent::new(FLAG_EVALUATED).tenant(tenant_id).data(json!({
                            "flag_id": flag_id,
                            "evaluator": evaluator.name(),
                            "fatal": reason.as_str(),
                        })),
                    );
                    return FlagDecision::Fatal(reason);
                }
            }
        }
        FlagDecision::NoDecision
    }

    /// Convenience wrapper applying the caller's default on `NoDecision`
    /// and `Fatal`.
    pub fn is_enabled(
        &self,
        flag_id: &str,
        tenant_id: Option<&str>,
        ctx: &RequestContext,
        default: bool,
    ) -> bool {
        match self.evaluate(flag_id, tenant_id, ctx) {
            FlagDecision::Decided(value) => value,
            FlagDecision::NoDecision | FlagDecision::Fatal(_) => default,
        }
    }

}
