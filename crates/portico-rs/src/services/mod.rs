//! Service layer: the dispatcher and the subsystems it assembles.
//!
//! - [`dispatcher`] - per-request decision sequence and module lifecycle
//! - [`proxy`] - materialized per-backend reverse-proxy handlers
//! - [`circuit_breaker`] - per-backend failure isolation
//! - [`composite`] - parallel fan-out with response merging
//! - [`dry_run`] - shadow traffic comparison
//! - [`cache`] - fingerprint-keyed TTL response cache
//! - [`flags`] - weight-ordered feature-flag evaluation chain
//! - [`health`] - background per-backend health probing
//! - [`events`] - synchronous fire-and-forget event bus
//! - [`metrics`] - atomic counters behind the JSON metrics endpoint

pub mod cache;
pub mod circuit_breaker;
pub mod composite;
pub mod dispatcher;
pub mod dry_run;
pub mod events;
pub mod flags;
pub mod health;
pub mod metrics;
pub mod proxy;
