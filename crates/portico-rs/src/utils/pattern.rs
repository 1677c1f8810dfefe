//! URL pattern compilation for route and endpoint matching.
//!
//! Patterns are either exact paths (`/api/status`), wildcard patterns where
//! `*` matches any remainder or segment run (`/api/*`), or parameterized
//! patterns with `{name}` segments matching exactly one segment
//! (`/users/{id}`). Exact patterns are matched by string equality; the rest
//! compile to anchored regexes once at startup.

use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PatternError {
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    #[error("regex compilation failed: {0}")]
    RegexError(String),
}

/// A pre-compiled URL pattern.
///
/// Cheap to clone; the compiled regex is shared through an `Arc`.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub pattern: String,
    exact: bool,
    regex: Option<Arc<Regex>>,
    literal_len: usize,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() || !pattern.starts_with('/') {
            return Err(PatternError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }

        if !pattern.contains('*') && !pattern.contains('{') {
            return Ok(Self {
                pattern: pattern.to_string(),
                exact: true,
                regex: None,
                literal_len: pattern.len(),
            });
        }

        let mut regex_pattern = String::with_capacity(pattern.len() * 2);
        regex_pattern.push('^');
        let mut literal_len = 0usize;

        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '*' => regex_pattern.push_str(".*"),
                '{' => {
                    let mut param_name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner.is_alphanumeric() || inner == '_' {
                            param_name.push(inner);
                        } else {
                            return Err(PatternError::InvalidPattern {
                                pattern: pattern.to_string(),
                            });
                        }
                    }
                    if !closed || param_name.is_empty() {
                        return Err(PatternError::InvalidPattern {
                            pattern: pattern.to_string(),
                        });
                    }
                    regex_pattern.push_str("([^/]+)");
                }
                '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' => {
                    regex_pattern.push('\\');
                    regex_pattern.push(ch);
                    literal_len += 1;
                }
                _ => {
                    regex_pattern.push(ch);
                    literal_len += 1;
                }
            }
        }
        regex_pattern.push('$');

        let regex =
            Regex::new(&regex_pattern).map_err(|e| PatternError::RegexError(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            exact: false,
            regex: Some(Arc::new(regex)),
            literal_len,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exact {
            return self.pattern == path;
        }
        match &self.regex {
            Some(regex) => regex.is_match(path),
            None => false,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Sort key: exact patterns first, then by descending literal length so
    /// `/api/v2/*` is tried before `/api/*`.
    pub fn specificity(&self) -> (u8, usize) {
        (u8::from(self.exact), self.literal_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = CompiledPattern::compile("/api/status").unwrap();
        assert!(p.is_exact());
        assert!(p.matches("/api/status"));
        assert!(!p.matches("/api/status/"));
        assert!(!p.matches("/api"));
    }

    #[test]
    fn wildcard_matches_remainder() {
        let p = CompiledPattern::compile("/api/*").unwrap();
        assert!(p.matches("/api/ping"));
        assert!(p.matches("/api/v1/users/7"));
        assert!(!p.matches("/metrics"));
    }

    #[test]
    fn param_matches_single_segment() {
        let p = CompiledPattern::compile("/users/{id}").unwrap();
        assert!(p.matches("/users/42"));
        assert!(!p.matches("/users/42/posts"));
    }

    #[test]
    fn bad_patterns_are_rejected() {
        assert!(CompiledPattern::compile("").is_err());
        assert!(CompiledPattern::compile("no-slash").is_err());
        assert!(CompiledPattern::compile("/x/{unclosed").is_err());
        assert!(CompiledPattern::compile("/x/{}").is_err());
    }

    #[test]
    fn specificity_prefers_exact_then_longer_literals() {
        let exact = CompiledPattern::compile("/api/ping").unwrap();
        let narrow = CompiledPattern::compile("/api/v2/*").unwrap();
        let wide = CompiledPattern::compile("/api/*").unwrap();
        assert!(exact.specificity() > narrow.specificity());
        assert!(narrow.specificity() > wide.specificity());
    }
}
