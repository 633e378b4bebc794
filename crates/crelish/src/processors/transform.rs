//! Display transformers for `state`, `date` and `datetime` fields.
//!
//! | Transform | Stored | Displayed |
//! |-----------|--------|-----------|
//! | `state` | `0..=3` | `Offline`, `Draft`, `Online`, `Archived` |
//! | `date` | `2024-01-31` | `31.01.2024` |
//! | `datetime` | epoch seconds | `31.01.2024 14:05:00` (UTC) |
//!
//! `before_save` accepts the stored form, the displayed form and a few common
//! spellings, so a processed record can be saved back unchanged. Null and
//! empty values pass through in both directions.

use super::ValueTransformer;
use crate::error::{CrelishError, Result};
use crate::model::RecordState;
use crate::value::{as_i64, is_empty, value_to_string};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

pub const DATE_STORAGE_FORMAT: &str = "%Y-%m-%d";
pub const DATE_DISPLAY_FORMAT: &str = "%d.%m.%Y";
pub const DATETIME_DISPLAY_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

const DATE_INPUT_FORMATS: [&str; 3] = [DATE_STORAGE_FORMAT, DATE_DISPLAY_FORMAT, "%d/%m/%Y"];
const DATETIME_INPUT_FORMATS: [&str; 4] = [
    DATETIME_DISPLAY_FORMAT,
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

fn invalid(kind: &str, value: &Value) -> CrelishError {
    CrelishError::processor(kind, format!("cannot read {} as a {}", value, kind))
}

pub struct StateTransformer;

impl ValueTransformer for StateTransformer {
    fn after_find(&self, value: Value) -> Result<Value> {
        Ok(match RecordState::from_value(&value) {
            Some(state) => Value::String(state.label().to_string()),
            None => value,
        })
    }

    fn before_save(&self, value: Value) -> Result<Value> {
        Ok(match RecordState::from_value(&value) {
            Some(state) => Value::from(state.code()),
            // Unknown values are left for the `in` rule to reject.
            None => value,
        })
    }
}

/// Calendar dates, stored as ISO `YYYY-MM-DD`.
pub struct DateTransformer;

impl DateTransformer {
    fn parse(value: &Value) -> Option<NaiveDate> {
        if let Some(epoch) = as_i64(value) {
            return Utc.timestamp_opt(epoch, 0).single().map(|dt| dt.date_naive());
        }
        let text = value_to_string(value);
        let text = text.trim();
        DATE_INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
    }
}

impl ValueTransformer for DateTransformer {
    fn after_find(&self, value: Value) -> Result<Value> {
        if is_empty(&value) {
            return Ok(value);
        }
        Ok(match Self::parse(&value) {
            Some(date) => Value::String(date.format(DATE_DISPLAY_FORMAT).to_string()),
            None => value,
        })
    }

    fn before_save(&self, value: Value) -> Result<Value> {
        if is_empty(&value) {
            return Ok(Value::Null);
        }
        Self::parse(&value)
            .map(|date| Value::String(date.format(DATE_STORAGE_FORMAT).to_string()))
            .ok_or_else(|| invalid("date", &value))
    }
}

/// Points in time, stored as epoch seconds.
pub struct DateTimeTransformer;

impl DateTimeTransformer {
    fn parse(value: &Value) -> Option<i64> {
        if let Some(epoch) = as_i64(value) {
            return Some(epoch);
        }
        let text = value_to_string(value);
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp());
        }
        if let Some(dt) = DATETIME_INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        {
            return Some(dt.and_utc().timestamp());
        }
        DateTransformer::parse(value)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
    }
}

impl ValueTransformer for DateTimeTransformer {
    fn after_find(&self, value: Value) -> Result<Value> {
        let Some(epoch) = as_i64(&value) else {
            return Ok(value);
        };
        Ok(match Utc.timestamp_opt(epoch, 0).single() {
            Some(dt) => Value::String(dt.format(DATETIME_DISPLAY_FORMAT).to_string()),
            None => value,
        })
    }

    fn before_save(&self, value: Value) -> Result<Value> {
        if is_empty(&value) {
            return Ok(Value::Null);
        }
        Self::parse(&value)
            .map(Value::from)
            .ok_or_else(|| invalid("datetime", &value))
    }
}
