//! Path rewriting and URL construction helpers.

use crate::models::config::PathRewrite;

/// Applies a rewrite rule: strip `strip_base_path` when it prefixes the
/// path, then prepend `base_path_rewrite`. The result always starts with
/// `/`.
///
/// For any rule whose `strip_base_path` is a prefix of the original path,
/// the transformation is invertible (strip the rewrite, re-prepend the
/// stripped base).
pub fn rewrite_path(path: &str, rule: &PathRewrite) -> String {
    let mut out = path.to_string();

    if let Some(strip) = &rule.strip_base_path {
        if !strip.is_empty() && out.starts_with(strip.as_str()) {
            out = out[strip.len()..].to_string();
        }
    }

    if let Some(prefix) = &rule.base_path_rewrite {
        if !prefix.is_empty() {
            let trimmed = prefix.trim_end_matches('/');
            out = format!("{}{}", trimmed, out);
        }
    }

    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

/// Joins a backend base URL with an already-rewritten path and optional
/// query string.
pub fn join_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
        _ => format!("{}{}", base, path),
    }
}
