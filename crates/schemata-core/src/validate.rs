//! Runtime validation rules for field values.
//!
//! A `ValidationRule` is the validation half of a field type: the JSON kind a
//! value must have plus an ordered list of constraints contributed by the
//! field type and its options.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::value::{Value, kind_name};

/// Thread-safe regex cache for compiled patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// Invalid patterns are logged and treated as a non-match; declarations are
/// checked with [`validate_pattern`] at resolution time so this only happens
/// for patterns built at runtime.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Returns an error message if the pattern is invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}

/// The JSON kind a field value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Number,
    Boolean,
    /// Any JSON value.
    Json,
    /// RFC 3339 timestamp string.
    Timestamp,
    /// Identity of a record in another collection (string or integer).
    Reference,
}

impl ValueKind {
    /// Whether `value` (non-null) has this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueKind::Text => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Json => true,
            ValueKind::Timestamp => value
                .as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
            ValueKind::Reference => value.is_string() || value.is_i64() || value.is_u64(),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Json => "json",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Reference => "reference",
        }
    }
}

/// A single constraint on a non-null value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Pattern(String),
    OneOf(Vec<Value>),
    /// Maximum digits after the decimal point.
    MaxScale(u32),
}

impl Constraint {
    /// Check `value`, returning a message on violation.
    pub fn check(&self, value: &Value) -> Option<String> {
        match self {
            Constraint::MinLength(min) => {
                let len = value.as_str()?.chars().count();
                (len < *min).then(|| format!("must be at least {min} characters"))
            }
            Constraint::MaxLength(max) => {
                let len = value.as_str()?.chars().count();
                (len > *max).then(|| format!("must be at most {max} characters"))
            }
            Constraint::Min(min) => {
                let n = value.as_f64()?;
                (n < *min).then(|| format!("must be >= {min}"))
            }
            Constraint::Max(max) => {
                let n = value.as_f64()?;
                (n > *max).then(|| format!("must be <= {max}"))
            }
            Constraint::Pattern(pattern) => {
                let s = value.as_str()?;
                (!matches_pattern(s, pattern)).then(|| format!("must match pattern {pattern}"))
            }
            Constraint::OneOf(allowed) => (!allowed.contains(value)).then(|| {
                let list: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                format!("must be one of {}", list.join(", "))
            }),
            Constraint::MaxScale(scale) => {
                let n = value.as_number()?;
                if n.is_f64() {
                    let text = n.to_string();
                    let decimals = text.split_once('.').map_or(0, |(_, frac)| frac.len());
                    (decimals > *scale as usize)
                        .then(|| format!("must have at most {scale} decimal places"))
                } else {
                    None
                }
            }
        }
    }
}

/// Validation description of a field type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub kind: ValueKind,
    pub constraints: Vec<Constraint>,
}

impl ValidationRule {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            constraints: Vec::new(),
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Validate a non-null value, returning every violated constraint.
    pub fn check(&self, value: &Value) -> Vec<String> {
        if !self.kind.accepts(value) {
            return vec![format!(
                "expected {}, got {}",
                self.kind.as_str(),
                kind_name(value)
            )];
        }
        self.constraints.iter().filter_map(|c| c.check(value)).collect()
    }

    /// Detect constraint sets no value can satisfy (e.g. `min > max`).
    ///
    /// Options are applied without checking each other, so contradictions
    /// only show up here, when a declaration is resolved.
    pub fn contradictions(&self) -> Vec<String> {
        let mut out = Vec::new();
        let lo = bound(&self.constraints, Bound::Lower, |c| match c {
            Constraint::Min(v) => Some(*v),
            _ => None,
        });
        let hi = bound(&self.constraints, Bound::Upper, |c| match c {
            Constraint::Max(v) => Some(*v),
            _ => None,
        });
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                out.push(format!("min {lo} exceeds max {hi}"));
            }
        }
        let lo_len = bound(&self.constraints, Bound::Lower, |c| match c {
            Constraint::MinLength(v) => Some(*v as f64),
            _ => None,
        });
        let hi_len = bound(&self.constraints, Bound::Upper, |c| match c {
            Constraint::MaxLength(v) => Some(*v as f64),
            _ => None,
        });
        if let (Some(lo), Some(hi)) = (lo_len, hi_len) {
            if lo > hi {
                out.push(format!("min_length {lo} exceeds max_length {hi}"));
            }
        }
        for c in &self.constraints {
            if let Constraint::Pattern(p) = c {
                if let Some(msg) = validate_pattern(p) {
                    out.push(msg);
                }
            }
            if let Constraint::OneOf(values) = c {
                if values.is_empty() {
                    out.push("empty list of allowed values".to_string());
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Lower,
    Upper,
}

/// Tightest bound among the constraints `pick` recognizes.
fn bound(
    constraints: &[Constraint],
    which: Bound,
    pick: impl Fn(&Constraint) -> Option<f64>,
) -> Option<f64> {
    constraints.iter().filter_map(pick).reduce(|a, b| match which {
        Bound::Lower => a.max(b),
        Bound::Upper => a.min(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::json;

    #[test]
    fn test_matches_email_pattern() {
        let email_pattern = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

        assert!(matches_pattern("test@example.com", email_pattern));
        assert!(matches_pattern("user.name+tag@domain.org", email_pattern));
        assert!(!matches_pattern("invalid", email_pattern));
        assert!(!matches_pattern("test@", email_pattern));
    }

    #[test]
    fn test_invalid_pattern_returns_false() {
        assert!(!matches_pattern("anything", r"[unclosed"));
    }

    #[test]
    fn test_validate_pattern_invalid() {
        let result = validate_pattern(r"[unclosed");
        assert!(result.is_some());
        assert!(result.unwrap().contains("invalid regex pattern"));
    }

    #[test]
    fn test_kind_mismatch_short_circuits() {
        let rule = ValidationRule::new(ValueKind::Text).with(Constraint::MaxLength(3));
        assert_eq!(rule.check(&json!(12)), vec!["expected text, got integer"]);
    }

    #[test]
    fn test_length_and_range() {
        let rule = ValidationRule::new(ValueKind::Text)
            .with(Constraint::MinLength(2))
            .with(Constraint::MaxLength(4));
        assert!(rule.check(&json!("abc")).is_empty());
        assert_eq!(rule.check(&json!("a")).len(), 1);
        assert_eq!(rule.check(&json!("abcde")).len(), 1);

        let rule = ValidationRule::new(ValueKind::Number).with(Constraint::Min(0.0));
        assert_eq!(rule.check(&json!(-1)), vec!["must be >= 0"]);
    }

    #[test]
    fn test_timestamp_kind() {
        assert!(ValueKind::Timestamp.accepts(&json!("2024-01-02T03:04:05Z")));
        assert!(!ValueKind::Timestamp.accepts(&json!("yesterday")));
    }

    #[test]
    fn test_scale() {
        let rule = ValidationRule::new(ValueKind::Number).with(Constraint::MaxScale(2));
        assert!(rule.check(&json!(1.25)).is_empty());
        assert!(!rule.check(&json!(1.255)).is_empty());
        assert!(rule.check(&json!(3)).is_empty());
    }

    #[test]
    fn test_contradictions() {
        let rule = ValidationRule::new(ValueKind::Integer)
            .with(Constraint::Min(10.0))
            .with(Constraint::Max(5.0));
        assert_eq!(rule.contradictions(), vec!["min 10 exceeds max 5"]);

        let rule = ValidationRule::new(ValueKind::Text).with(Constraint::Pattern("[".into()));
        assert_eq!(rule.contradictions().len(), 1);
    }
}
