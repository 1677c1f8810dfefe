//! Dry-run routes: shadow a request to a comparison backend and log a diff.
//!
//! Both sides run to completion (neither cancels the other) so the diff is
//! meaningful; each side is still bounded by its own deadline. The client
//! always gets the configured side's response, and comparison-side failures
//! never surface.

use crate::models::config::{DryRunConfig, ResponseSide};
use crate::models::error::GatewayError;
use crate::services::metrics::GatewayMetrics;
use crate::services::proxy::{BackendProxy, ForwardParts, UpstreamResult};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use log::{debug, info};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of comparing the two sides.
#[derive(Debug)]
struct ComparisonReport {
    status_match: bool,
    headers_match: bool,
    body_match: bool,
    primary_ms: u64,
    secondary_ms: u64,
}

pub struct DryRunExecutor {
    metrics: Arc<GatewayMetrics>,
}

impl DryRunExecutor {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }

    /// Invokes both backends concurrently, records the diff, and returns
    /// the side selected by `default_response_backend`.
    pub async fn handle(
        &self,
        primary: Arc<BackendProxy>,
        secondary: Arc<BackendProxy>,
        config: &DryRunConfig,
        parts: &ForwardParts,
        body: Bytes,
        deadline: Duration,
    ) -> Result<HttpResponse, GatewayError> {
        let primary_started = Instant::now();
        let secondary_started = Instant::now();
        let (primary_result, secondary_result) = tokio::join!(
            primary.forward(parts, body.clone(), deadline),
            secondary.forward(parts, body.clone(), deadline),
        );
        let primary_ms = primary_started.elapsed().as_millis() as u64;
        let secondary_ms = secondary_started.elapsed().as_millis() as u64;

        self.metrics
            .dry_run_comparisons
            .fetch_add(1, Ordering::Relaxed);

        let report = compare(
            &primary_result,
            &secondary_result,
            config,
            primary_ms,
            secondary_ms,
        );
        info!(
            "dry-run {} primary={} secondary={} status_match={} headers_match={} body_match={} \
             primary_ms={} secondary_ms={}",
            parts.path,
            primary.backend_id,
            secondary.backend_id,
            report.status_match,
            report.headers_match,
            report.body_match,
            report.primary_ms,
            report.secondary_ms,
        );
        if config.log_responses {
            debug!(
                "dry-run bodies for {}: primary={:?} secondary={:?}",
                parts.path,
                body_preview(&primary_result, config.max_body_size),
                body_preview(&secondary_result, config.max_body_size),
            );
        }

        let (chosen, side) = match config.default_response_backend {
            ResponseSide::Primary => (primary_result, primary.backend_id.as_str()),
            ResponseSide::Secondary => (secondary_result, secondary.backend_id.as_str()),
        };
        to_response(chosen, side, deadline)
    }
}

fn compare(
    primary: &UpstreamResult,
    secondary: &UpstreamResult,
    config: &DryRunConfig,
    primary_ms: u64,
    secondary_ms: u64,
) -> ComparisonReport {
    let (status_match, headers_match, body_match) = match (primary, secondary) {
        (
            UpstreamResult::Response {
                status: ps,
                headers: ph,
                body: pb,
            },
            UpstreamResult::Response {
                status: ss,
                headers: sh,
                body: sb,
            },
        ) => {
            let status_match = ps == ss;

            let compared: Vec<String> = if config.compare_headers.is_empty() {
                ph.keys()
                    .chain(sh.keys())
                    .map(|k| k.as_str().to_ascii_lowercase())
                    .filter(|k| !config.ignore_headers.iter().any(|i| i.eq_ignore_ascii_case(k)))
                    .collect()
            } else {
                config
                    .compare_headers
                    .iter()
                    .map(|h| h.to_ascii_lowercase())
                    .collect()
            };
            let headers_match = compared.iter().all(|name| {
                ph.get(name.as_str()).map(|v| v.as_bytes())
                    == sh.get(name.as_str()).map(|v| v.as_bytes())
            });

            let limit = config.max_body_size;
            let body_match = truncated(pb, limit) == truncated(sb, limit);
            (status_match, headers_match, body_match)
        }
        _ => (false, false, false),
    };

    ComparisonReport {
        status_match,
        headers_match,
        body_match,
        primary_ms,
        secondary_ms,
    }
}

fn truncated(body: &Bytes, limit: usize) -> &[u8] {
    &body[..body.len().min(limit)]
}

fn body_preview(result: &UpstreamResult, limit: usize) -> String {
    match result {
        UpstreamResult::Response { body, .. } => {
            String::from_utf8_lossy(truncated(body, limit)).into_owned()
        }
        UpstreamResult::ConnectError(e) => format!("<connect error: {}>", e),
        UpstreamResult::Timeout => "<timeout>".to_string(),
    }
}

fn to_response(
    result: UpstreamResult,
    backend: &str,
    deadline: Duration,
) -> Result<HttpResponse, GatewayError> {
    match result {
        UpstreamResult::Response {
            status,
            headers,
            body,
        } => {
            let mut builder = HttpResponse::build(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            );
            for (name, value) in headers.iter() {
                if name.as_str().eq_ignore_ascii_case("connection")
                    || name.as_str().eq_ignore_ascii_case("transfer-encoding")
                {
                    continue;
                }
                if let Ok(value) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
                {
                    builder.insert_header((name.as_str(), value));
                }
            }
            Ok(builder.body(body))
        }
        UpstreamResult::ConnectError(message) => Err(GatewayError::Upstream {
            backend: backend.to_string(),
            message,
        }),
        UpstreamResult::Timeout => Err(GatewayError::Timeout {
            backend: backend.to_string(),
            timeout_secs: deadline.as_secs(),
        }),
    }
}
