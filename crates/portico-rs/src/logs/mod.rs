//! Logging setup for the portico gateway.

pub mod logger;
