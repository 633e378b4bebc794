//! Field validation rules.
//!
//! Rules come from the schema document (`"rules": [["required"], ["string", {"max": 128}]]`)
//! and are checked against the storage form of a value, after transformers
//! have run their `before_save` step.
//!
//! | Rule | Params | Passes when |
//! |------|--------|-------------|
//! | `required` | | value is not empty |
//! | `string` | `min`, `max` | value is a string within the length bounds |
//! | `integer` | `min`, `max` | value is integral (numeric strings accepted) |
//! | `number` | `min`, `max` | value is numeric |
//! | `boolean` | | `true`/`false`/`0`/`1` |
//! | `email` | | looks like `local@domain.tld` |
//! | `url` | | `http://` or `https://` URL |
//! | `in` | `range` | value loosely equals one entry of `range` |
//! | `match` | `pattern` | value matches the regex |
//! | `unique` | | checked by the model against its backend |
//! | `safe`, `default` | | always |
//!
//! Every rule except `required` skips empty values.

use crate::schema::RuleSpec;
use crate::value::{as_f64, as_i64, is_empty, loose_eq, value_to_string};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid url regex"));

/// Validation messages keyed by field, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Rules handled outside [`check_rule`].
pub fn is_deferred(rule: &RuleSpec) -> bool {
    matches!(rule.name.as_str(), "unique" | "default")
}

/// Check one rule against one value. `None` means the value passes.
pub fn check_rule(rule: &RuleSpec, label: &str, value: &Value) -> Option<String> {
    if rule.name == "required" {
        return is_empty(value).then(|| format!("{} cannot be blank.", label));
    }
    if is_empty(value) {
        return None;
    }

    match rule.name.as_str() {
        "string" => {
            let Value::String(s) = value else {
                return Some(format!("{} must be a string.", label));
            };
            check_bounds(rule, label, s.chars().count() as f64, "characters")
        }
        "integer" => match as_i64(value) {
            Some(n) => check_bounds(rule, label, n as f64, ""),
            None => Some(format!("{} must be an integer.", label)),
        },
        "number" => match as_f64(value) {
            Some(n) => check_bounds(rule, label, n, ""),
            None => Some(format!("{} must be a number.", label)),
        },
        "boolean" => {
            let ok = value.is_boolean() || matches!(value_to_string(value).as_str(), "0" | "1");
            (!ok).then(|| format!("{} must be either true or false.", label))
        }
        "email" => (!EMAIL.is_match(&value_to_string(value)))
            .then(|| format!("{} is not a valid email address.", label)),
        "url" => (!URL.is_match(&value_to_string(value)))
            .then(|| format!("{} is not a valid URL.", label)),
        "in" => {
            let range = rule
                .param("range")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let candidates: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            let ok = candidates
                .iter()
                .all(|c| range.iter().any(|allowed| loose_eq(c, allowed)));
            (!ok).then(|| format!("{} is invalid.", label))
        }
        "match" => {
            let pattern = rule.param("pattern").and_then(Value::as_str)?;
            match Regex::new(strip_delimiters(pattern)) {
                Ok(re) => (!re.is_match(&value_to_string(value)))
                    .then(|| format!("{} is invalid.", label)),
                Err(e) => {
                    debug!(rule = %rule.name, error = %e, "ignoring unparsable match pattern");
                    None
                }
            }
        }
        "safe" | "unique" | "default" => None,
        other => {
            debug!(rule = other, "ignoring unknown validation rule");
            None
        }
    }
}

/// Accept `/pattern/` as written in older schema documents.
fn strip_delimiters(pattern: &str) -> &str {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        &pattern[1..pattern.len() - 1]
    } else {
        pattern
    }
}

fn check_bounds(rule: &RuleSpec, label: &str, n: f64, unit: &str) -> Option<String> {
    let suffix = if unit.is_empty() {
        String::new()
    } else {
        format!(" {}", unit)
    };
    if let Some(min) = rule.param("min").and_then(as_f64) {
        if n < min {
            return Some(format!("{} should contain at least {}{}.", label, min, suffix));
        }
    }
    if let Some(max) = rule.param("max").and_then(as_f64) {
        if n > max {
            return Some(format!("{} should contain at most {}{}.", label, max, suffix));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(name: &str) -> RuleSpec {
        RuleSpec::new(name)
    }

    #[test]
    fn required_is_the_only_rule_that_sees_empty_values() {
        assert!(check_rule(&rule("required"), "Title", &json!("")).is_some());
        assert!(check_rule(&rule("email"), "Mail", &json!("")).is_none());
        assert!(check_rule(&rule("integer"), "Count", &Value::Null).is_none());
    }

    #[test]
    fn string_length_bounds() {
        let r = rule("string").with_param("max", json!(3));
        assert!(check_rule(&r, "Code", &json!("abc")).is_none());
        assert!(check_rule(&r, "Code", &json!("abcd")).is_some());
        assert!(check_rule(&rule("string"), "Code", &json!(5)).is_some());
    }

    #[test]
    fn numeric_rules_accept_numeric_strings() {
        assert!(check_rule(&rule("integer"), "N", &json!("12")).is_none());
        assert!(check_rule(&rule("integer"), "N", &json!("1.5")).is_some());
        let r = rule("number").with_param("min", json!(0));
        assert!(check_rule(&r, "Price", &json!("-1")).is_some());
    }

    #[test]
    fn in_range_checks_every_list_item() {
        let r = rule("in").with_param("range", json!([0, 1, 2, 3]));
        assert!(check_rule(&r, "State", &json!("2")).is_none());
        assert!(check_rule(&r, "State", &json!(7)).is_some());
        assert!(check_rule(&r, "State", &json!([1, 9])).is_some());
    }

    #[test]
    fn match_accepts_delimited_patterns() {
        let r = rule("match").with_param("pattern", json!("/^[a-z-]+$/"));
        assert!(check_rule(&r, "Slug", &json!("hello-world")).is_none());
        assert!(check_rule(&r, "Slug", &json!("Hello World")).is_some());
    }

    #[test]
    fn format_rules() {
        assert!(check_rule(&rule("email"), "Mail", &json!("a@b.io")).is_none());
        assert!(check_rule(&rule("email"), "Mail", &json!("nope")).is_some());
        assert!(check_rule(&rule("url"), "Link", &json!("https://crelish.io/x")).is_none());
        assert!(check_rule(&rule("url"), "Link", &json!("ftp://x")).is_some());
        assert!(check_rule(&rule("boolean"), "Flag", &json!("1")).is_none());
        assert!(check_rule(&rule("boolean"), "Flag", &json!("yes")).is_some());
    }

    #[test]
    fn errors_display_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "Title cannot be blank.");
        errors.add("email", "Mail is not a valid email address.");
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "email: Mail is not a valid email address.; title: Title cannot be blank."
        );
    }
}
