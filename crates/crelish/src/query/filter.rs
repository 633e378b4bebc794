//! Filter grammar shared by both storage backends.
//!
//! A filter is a JSON object mapping field keys to conditions:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `"title": "launch"` | substring match, case-insensitive |
//! | `"state": 2` / `"slug": "home"` | exact match (`slug` and `state` only) |
//! | `"title": ["strict", "Launch"]` | equality |
//! | `"image": ["noempty"]` | not null and not empty |
//! | `"price": ["lt", 10]` / `["gt", 10]` | strict comparison |
//! | `"price": ["between", 5, 1]` | inclusive range, operand order irrelevant |
//! | `"freesearch": "rust berlin"` | every token somewhere in the record |
//!
//! Conditions are ANDed. All matching happens against stored values, so a
//! filter means the same thing whichever backend evaluates it.

use crate::error::{CrelishError, Result};
use crate::model::{Attributes, SLUG, STATE};
use crate::value::{compare, is_empty, loose_eq, value_to_string};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Reserved filter key for token search across the whole record.
pub const FREESEARCH: &str = "freesearch";

/// Fields where a bare scalar means equality rather than substring.
pub const EXACT_MATCH_FIELDS: [&str; 2] = [SLUG, STATE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "lowercase")]
pub enum FilterOp {
    /// Bare scalar: equality on exact-match fields, substring otherwise.
    Match(Value),
    Strict(Value),
    NotEmpty,
    Lt(Value),
    Gt(Value),
    Between(Value, Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    /// Whether a bare-scalar match on this field is an equality check.
    pub fn is_exact_field(&self) -> bool {
        EXACT_MATCH_FIELDS.contains(&self.field.as_str())
    }

    pub fn matches(&self, attrs: &Attributes) -> bool {
        self.accepts(attrs.get(&self.field).unwrap_or(&Value::Null))
    }

    /// Test one stored value of this filter's field.
    pub fn accepts(&self, value: &Value) -> bool {
        match &self.op {
            FilterOp::Match(needle) => {
                if value.is_null() {
                    return false;
                }
                if self.is_exact_field() {
                    loose_eq(value, needle)
                } else {
                    contains_ci(&value_to_string(value), &value_to_string(needle))
                }
            }
            FilterOp::Strict(expected) => !value.is_null() && loose_eq(value, expected),
            FilterOp::NotEmpty => !is_empty(value),
            FilterOp::Lt(bound) => !value.is_null() && compare(value, bound) == Ordering::Less,
            FilterOp::Gt(bound) => !value.is_null() && compare(value, bound) == Ordering::Greater,
            FilterOp::Between(a, b) => {
                if value.is_null() {
                    return false;
                }
                let (lo, hi) = ordered_bounds(a, b);
                compare(value, lo) != Ordering::Less && compare(value, hi) != Ordering::Greater
            }
        }
    }
}

/// Returns the two bounds as (low, high).
pub fn ordered_bounds<'a>(a: &'a Value, b: &'a Value) -> (&'a Value, &'a Value) {
    if compare(a, b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    }
}

pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub conditions: Vec<FieldFilter>,
    pub freesearch: Vec<String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.freesearch.is_empty()
    }

    pub fn with(mut self, field: impl Into<String>, op: FilterOp) -> Self {
        self.conditions.push(FieldFilter::new(field, op));
        self
    }

    pub fn matching(self, field: impl Into<String>, value: Value) -> Self {
        self.with(field, FilterOp::Match(value))
    }

    pub fn strict(self, field: impl Into<String>, value: Value) -> Self {
        self.with(field, FilterOp::Strict(value))
    }

    pub fn not_empty(self, field: impl Into<String>) -> Self {
        self.with(field, FilterOp::NotEmpty)
    }

    pub fn between(self, field: impl Into<String>, a: Value, b: Value) -> Self {
        self.with(field, FilterOp::Between(a, b))
    }

    pub fn search(mut self, text: &str) -> Self {
        self.freesearch
            .extend(text.split_whitespace().map(str::to_string));
        self
    }

    /// Parse the JSON object form.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_map(map),
            other => Err(CrelishError::InvalidFilter(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let mut spec = Self::new();
        for (key, value) in map {
            if key == FREESEARCH {
                let text = value_to_string(value);
                spec = spec.search(&text);
                continue;
            }
            let op = parse_condition(key, value)?;
            spec.conditions.push(FieldFilter::new(key.clone(), op));
        }
        Ok(spec)
    }

    /// Text a freesearch token is matched against: every stored value.
    pub fn search_haystack(attrs: &Attributes) -> String {
        attrs
            .values()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join("\u{1f}")
            .to_lowercase()
    }

    pub fn matches(&self, attrs: &Attributes) -> bool {
        if !self.conditions.iter().all(|c| c.matches(attrs)) {
            return false;
        }
        if self.freesearch.is_empty() {
            return true;
        }
        let haystack = Self::search_haystack(attrs);
        self.freesearch
            .iter()
            .all(|token| haystack.contains(&token.to_lowercase()))
    }
}

fn parse_condition(field: &str, value: &Value) -> Result<FilterOp> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => {
            return Err(CrelishError::InvalidFilter(format!(
                "condition for '{}' must be a scalar or an operator tuple",
                field
            )))
        }
        scalar => return Ok(FilterOp::Match(scalar.clone())),
    };

    let invalid = |msg: &str| CrelishError::InvalidFilter(format!("'{}': {}", field, msg));
    let tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("operator tuple must start with an operator name"))?;
    let arg = |i: usize| items.get(i).cloned();

    match (tag.to_ascii_lowercase().as_str(), items.len()) {
        ("strict", 2) => Ok(FilterOp::Strict(arg(1).unwrap_or(Value::Null))),
        ("noempty", 1 | 2) => Ok(FilterOp::NotEmpty),
        ("lt", 2) => Ok(FilterOp::Lt(arg(1).unwrap_or(Value::Null))),
        ("gt", 2) => Ok(FilterOp::Gt(arg(1).unwrap_or(Value::Null))),
        ("between", 3) => Ok(FilterOp::Between(
            arg(1).unwrap_or(Value::Null),
            arg(2).unwrap_or(Value::Null),
        )),
        ("strict" | "noempty" | "lt" | "gt" | "between", n) => Err(invalid(&format!(
            "wrong number of operands for '{}' ({} elements)",
            tag, n
        ))),
        (other, _) => Err(invalid(&format!("unknown operator '{}'", other))),
    }
}
