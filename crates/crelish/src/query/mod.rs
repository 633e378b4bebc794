//! # Query Grammar
//!
//! Filters, sorts and pages as understood by every storage backend.
//!
//! Callers usually hand over one JSON settings object:
//!
//! ```json
//! {
//!   "filter": { "state": 2, "freesearch": "launch" },
//!   "sort": ["startDate", "desc", "title"],
//!   "pageSize": 20,
//!   "page": 1
//! }
//! ```
//!
//! [`QuerySettings::from_value`] turns that into typed parts. Backends never
//! see the JSON form.

mod filter;
mod page;
mod sort;

pub(crate) use filter::contains_ci;
pub use filter::{ordered_bounds, FieldFilter, FilterOp, FilterSpec, EXACT_MATCH_FIELDS, FREESEARCH};
pub use page::Page;
pub use sort::{SortDirection, SortKey, SortSpec};

use crate::error::{CrelishError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Recognized query options of a [`crate::manager::DataManager`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySettings {
    pub filter: FilterSpec,
    pub sort: SortSpec,
    /// `None` means the configured default page size.
    pub page_size: Option<usize>,
    pub page: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    filter: Value,
    #[serde(default)]
    sort: Value,
    page_size: Option<usize>,
    page: Option<usize>,
}

impl QuerySettings {
    pub fn new() -> Self {
        Self {
            page: 1,
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }

    /// Parse the `{filter, sort, pageSize, page}` settings object.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::new());
        }
        let raw: RawSettings = serde_json::from_value(value.clone())
            .map_err(|e| CrelishError::InvalidFilter(format!("bad query settings: {}", e)))?;
        Ok(Self {
            filter: FilterSpec::from_value(&raw.filter)?,
            sort: SortSpec::from_value(&raw.sort)?,
            page_size: raw.page_size,
            page: raw.page.unwrap_or(1).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_settings_object() {
        let settings = QuerySettings::from_value(&json!({
            "filter": {"title": "launch", "price": ["between", 10, 1]},
            "sort": ["startDate", "desc"],
            "pageSize": 5,
        }))
        .unwrap();
        assert_eq!(settings.filter.conditions.len(), 2);
        assert_eq!(settings.sort.keys[0].direction, SortDirection::Desc);
        assert_eq!(settings.page_size, Some(5));
        assert_eq!(settings.page, 1);
    }

    #[test]
    fn empty_settings_are_defaults() {
        let settings = QuerySettings::from_value(&json!({})).unwrap();
        assert!(settings.filter.is_empty());
        assert!(settings.sort.is_empty());
        assert_eq!(settings, QuerySettings::new());
    }

    #[test]
    fn bad_operator_is_reported() {
        let err = QuerySettings::from_value(&json!({"filter": {"a": ["near", 1]}})).unwrap_err();
        assert!(matches!(err, CrelishError::InvalidFilter(_)));
    }
}
