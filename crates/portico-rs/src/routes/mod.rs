//! HTTP endpoint registration.
//!
//! Registration order matters: [`health`], [`metrics`], and [`debug`]
//! routes go first, the [`proxy`] catch-all last, so internal endpoints are
//! never shadowed by routing configuration.

pub mod debug;
pub mod health;
pub mod metrics;
pub mod proxy;
