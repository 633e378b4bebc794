//! Sort grammar.
//!
//! A sort spec is a flat list alternating field names and optional direction
//! tokens: `["startDate", "desc", "title"]` sorts by `startDate` descending,
//! then `title` ascending.

use crate::error::{CrelishError, Result};
use crate::model::Attributes;
use crate::value::compare;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse `asc`/`desc` and the legacy `SORT_ASC`/`SORT_DESC` tokens.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "asc" | "sort_asc" => Some(Self::Asc),
            "desc" | "sort_desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parse the alternating token list.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = SortSpec::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            match (SortDirection::parse(token), spec.keys.last_mut()) {
                (Some(direction), Some(last)) => last.direction = direction,
                // A leading direction token has nothing to apply to.
                (Some(_), None) => {}
                (None, _) => spec.keys.push(SortKey {
                    field: token.to_string(),
                    direction: SortDirection::Asc,
                }),
            }
        }
        spec
    }

    /// Parse `"title desc, created"` style strings.
    pub fn parse_str(input: &str) -> Self {
        Self::from_tokens(input.split(|c: char| c.is_whitespace() || c == ',' || c == ':'))
    }

    /// Parse a JSON array of tokens, or a string.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::String(s) => Ok(Self::parse_str(s)),
            Value::Array(items) => {
                let tokens = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            CrelishError::InvalidFilter(format!("sort token {} is not a string", item))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::from_tokens(tokens))
            }
            other => Err(CrelishError::InvalidFilter(format!(
                "sort must be a list of tokens, got {}",
                other
            ))),
        }
    }

    pub fn to_tokens(&self) -> Vec<String> {
        self.keys
            .iter()
            .flat_map(|k| {
                let dir = match k.direction {
                    SortDirection::Asc => "asc",
                    SortDirection::Desc => "desc",
                };
                [k.field.clone(), dir.to_string()]
            })
            .collect()
    }

    pub fn compare(&self, a: &Attributes, b: &Attributes) -> Ordering {
        for key in &self.keys {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = match key.direction {
                SortDirection::Asc => compare(left, right),
                SortDirection::Desc => compare(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable in-place sort of stored records.
    pub fn sort<T, F>(&self, items: &mut [T], attrs: F)
    where
        F: Fn(&T) -> &Attributes,
    {
        if self.keys.is_empty() {
            return;
        }
        items.sort_by(|a, b| self.compare(attrs(a), attrs(b)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn direction_defaults_to_ascending() {
        let spec = SortSpec::from_tokens(["startDate", "desc", "title"]);
        assert_eq!(
            spec,
            SortSpec::new()
                .by("startDate", SortDirection::Desc)
                .by("title", SortDirection::Asc)
        );
    }

    #[test]
    fn parses_legacy_tokens_and_strings() {
        let spec = SortSpec::parse_str("created SORT_DESC, title");
        assert_eq!(spec.keys[0].direction, SortDirection::Desc);
        assert_eq!(spec.keys[1].field, "title");
        assert_eq!(spec.to_tokens(), vec!["created", "desc", "title", "asc"]);
    }

    #[test]
    fn multi_key_sort() {
        let mut items = vec![
            attrs(json!({"a": 1, "b": "x"})),
            attrs(json!({"a": 2, "b": "y"})),
            attrs(json!({"a": 1, "b": "z"})),
        ];
        SortSpec::from_tokens(["a", "asc", "b", "desc"]).sort(&mut items, |a| a);
        let bs: Vec<_> = items.iter().map(|i| i["b"].as_str().unwrap()).collect();
        assert_eq!(bs, vec!["z", "x", "y"]);
    }

    #[test]
    fn rejects_non_string_tokens() {
        assert!(SortSpec::from_value(&json!(["a", 1])).is_err());
        assert!(SortSpec::from_value(&json!(5)).is_err());
    }
}
