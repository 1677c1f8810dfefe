//! # portico-rs
//!
//! Multi-tenant reverse-proxy gateway library.
//!
//! Portico sits between clients and a fleet of HTTP backend services. For each
//! incoming request it selects a backend (or a set of backends), rewrites the
//! path and headers, forwards the request, and returns the response, while
//! enforcing per-backend failure isolation (circuit breakers), feature-flag
//! gated routing, background health probing, response caching for composite
//! fan-outs, and side-by-side dry-run comparison of two backends.
//!
//! # Module Organization
//!
//! - [`models`] - Configuration tree, tenant overlays, errors, and events
//! - [`config`] - Configuration loading and validation
//! - [`services`] - Dispatcher, proxy pipeline, circuit breakers, cache,
//!   feature flags, health checker, metrics, and the event bus
//! - [`routes`] - Actix Web endpoint registration (health, metrics, debug,
//!   proxy catch-all)
//! - [`logs`] - Structured logger configuration
//! - [`utils`] - Path and pattern helpers shared across services
//!
//! # Quick start
//!
//! ```no_run
//! use portico_rs::config::settings::load_settings;
//! use portico_rs::services::dispatcher::RequestDispatcher;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_settings()?;
//! let dispatcher = Arc::new(RequestDispatcher::new(config)?);
//! dispatcher.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
