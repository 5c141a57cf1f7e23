//! Field-level predicate trees and read options.
//!
//! `Filter` is the `where` of every operation. It is evaluated by the
//! persistence collaborator, rewritten by plugins (soft-delete adds an
//! implicit `deleted_at IS NULL`), and serialized deterministically to build
//! cache keys.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value, compare_values, values_equal};

/// A predicate over a record's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    /// Substring match on strings, membership on arrays.
    Contains { field: String, value: Value },
    IsNull { field: String },
    IsNotNull { field: String },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull {
            field: field.into(),
        }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Filter::IsNotNull {
            field: field.into(),
        }
    }

    /// Match a single record by identity.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::eq(crate::value::ID_FIELD, value)
    }

    /// Match any of the given identities.
    pub fn ids(values: Vec<Value>) -> Self {
        Self::is_in(crate::value::ID_FIELD, values)
    }

    /// Negate this filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Or(mut a), Filter::Or(b)) => {
                a.extend(b);
                Filter::Or(a)
            }
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (a, b) => Filter::Or(vec![a, b]),
        }
    }

    /// Evaluate this filter against a record.
    ///
    /// Missing fields read as `null`; ordering comparisons between
    /// incompatible kinds are false.
    pub fn matches(&self, record: &Record) -> bool {
        let get = |field: &str| record.get(field).unwrap_or(&Value::Null);
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
            Filter::Eq { field, value } => values_equal(record.get(field), Some(value)),
            Filter::Ne { field, value } => !values_equal(record.get(field), Some(value)),
            Filter::Gt { field, value } => {
                compare_non_null(get(field), value) == Some(Ordering::Greater)
            }
            Filter::Gte { field, value } => matches!(
                compare_non_null(get(field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt { field, value } => compare_non_null(get(field), value) == Some(Ordering::Less),
            Filter::Lte { field, value } => matches!(
                compare_non_null(get(field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In { field, values } => values
                .iter()
                .any(|v| values_equal(record.get(field), Some(v))),
            Filter::Contains { field, value } => match (get(field), value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => {
                    items.iter().any(|item| values_equal(Some(item), Some(needle)))
                }
                _ => false,
            },
            Filter::IsNull { field } => get(field).is_null(),
            Filter::IsNotNull { field } => !get(field).is_null(),
        }
    }

    /// Equivalent filter with `And`/`Or` children in a canonical order.
    pub fn normalized(&self) -> Filter {
        fn sorted(children: &[Filter]) -> Vec<Filter> {
            let mut keyed: Vec<(String, Filter)> = children
                .iter()
                .map(|child| {
                    let child = child.normalized();
                    (serde_json::to_string(&child).unwrap_or_default(), child)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            keyed.dedup_by(|a, b| a.0 == b.0);
            keyed.into_iter().map(|(_, child)| child).collect()
        }
        match self {
            Filter::And(children) => Filter::And(sorted(children)),
            Filter::Or(children) => Filter::Or(sorted(children)),
            Filter::Not(inner) => Filter::Not(Box::new(inner.normalized())),
            other => other.clone(),
        }
    }

    /// Every field name referenced anywhere in this filter.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_fields(out);
                }
            }
            Filter::Not(inner) => inner.collect_fields(out),
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::In { field, .. }
            | Filter::Contains { field, .. }
            | Filter::IsNull { field }
            | Filter::IsNotNull { field } => out.push(field),
        }
    }
}

fn compare_non_null(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    compare_values(a, b)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One `order_by` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Options recognized by read operations (and the `where` of writes).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter, combining with any existing one via `And`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.and_filter(filter);
        self
    }

    /// Combine `filter` into the current filter in place.
    pub fn and_filter(&mut self, filter: Filter) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
    }

    /// Copy with the filter in canonical form, for keying equivalent queries
    /// alike.
    pub fn normalized(&self) -> FindOptions {
        FindOptions {
            filter: self.filter.as_ref().map(Filter::normalized),
            ..self.clone()
        }
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include.push(relation.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn include_deleted(mut self, value: bool) -> Self {
        self.include_deleted = value;
        self
    }

    /// Whether `record` passes the filter (no filter matches everything).
    pub fn matches(&self, record: &Record) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(record))
    }

    /// Apply `order_by`, then `offset` and `limit`, to already-filtered records.
    pub fn apply_window(&self, records: &mut Vec<Record>) {
        if !self.order_by.is_empty() {
            records.sort_by(|a, b| {
                for term in &self.order_by {
                    let av = a.get(&term.field).unwrap_or(&Value::Null);
                    let bv = b.get(&term.field).unwrap_or(&Value::Null);
                    let ord = compare_values(av, bv).unwrap_or(Ordering::Equal);
                    let ord = match term.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let offset = self.offset.unwrap_or(0).min(records.len());
        records.drain(..offset);
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
    }
}
