//! Logger configuration and structured output formatting.
//!
//! Builds on `env_logger` with a column-aligned format: timestamp, colored
//! level, source module, message. Intended to be called once at startup by
//! the gateway binary; tests and embedders may skip it entirely.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width reserved for the `[LEVEL]` column.
const LEVEL_FIELD_WIDTH: usize = 8;

/// Visible width reserved for the module-path column.
const MODULE_FIELD_WIDTH: usize = 28;

fn color_for(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[34m",
        log::Level::Trace => "\x1b[35m",
    }
}

/// Configure and initialize the application's logging system.
///
/// Output format:
///
/// ```text
/// 2024-03-15 10:30:00.123 | [INFO ] | portico_rs::services::health | backend api healthy again
/// ```
///
/// # Environment
///
/// - `RUST_LOG` - level filter (overrides the `Info` default)
/// - `NO_COLOR` - disables ANSI coloring for log shippers
///
/// Call once during startup. Subsequent calls would panic inside
/// `env_logger`, so embedders that already installed a logger should not
/// call this.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let level = env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    Builder::new()
        .format(move |buf, record| {
            let level_plain = format!("[{}]", record.level());
            let level_display = if no_color {
                level_plain.clone()
            } else {
                format!("{}{}\x1b[0m", color_for(record.level()), level_plain)
            };
            // Padding is computed from the plain text so ANSI codes do not
            // skew the columns.
            let level_pad = LEVEL_FIELD_WIDTH.saturating_sub(level_plain.len()).max(1);

            let module = record.module_path().unwrap_or("unknown");
            let module_pad = MODULE_FIELD_WIDTH.saturating_sub(module.len()).max(1);

            writeln!(
                buf,
                "{} | {}{}| {}{}| {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level_display,
                " ".repeat(level_pad),
                module,
                " ".repeat(module_pad),
                record.args(),
            )
        })
        .filter_level(level)
        .init();
}
