//! # Domain Model: Records
//!
//! A [`Record`] is one content item of one content type. Records are schema
//! driven: there is no Rust struct per content type, just an ordered map of
//! field key to JSON value plus the owning `ctype`.
//!
//! ## Two Shapes of the Same Record
//!
//! Every record exists in two shapes:
//!
//! - **Stored**: what sits on disk (`{ctype}/{uuid}.json`) or in a table row.
//!   A flat JSON object, one key per schema field, system fields included.
//! - **Processed**: what callers receive. Each field has been run through its
//!   processor and transformer (e.g. `state: 1` becomes `state: "Draft"`) and
//!   the `ctype` key is always present.
//!
//! Both backends must re-derive the same processed shape from their stored
//! shape, which is what makes the storage mode invisible to callers.
//!
//! ## System Fields
//!
//! | Key | Stored as | Notes |
//! |-----|-----------|-------|
//! | `uuid` | string | v4, minted on first save, immutable |
//! | `state` | integer | see [`RecordState`] |
//! | `created` | epoch seconds | stamped on first save |
//! | `updated` | epoch seconds | stamped on every later save |
//! | `from` / `to` | epoch seconds or null | publish window |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Flat attribute map of a stored or processed record.
pub type Attributes = Map<String, Value>;

pub const UUID: &str = "uuid";
pub const STATE: &str = "state";
pub const CREATED: &str = "created";
pub const UPDATED: &str = "updated";
pub const FROM: &str = "from";
pub const TO: &str = "to";
pub const CTYPE: &str = "ctype";
pub const SLUG: &str = "slug";

/// Publication state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    Offline = 0,
    Draft = 1,
    Online = 2,
    Archived = 3,
}

impl Default for RecordState {
    fn default() -> Self {
        Self::Draft
    }
}

impl RecordState {
    pub const ALL: [RecordState; 4] = [
        RecordState::Offline,
        RecordState::Draft,
        RecordState::Online,
        RecordState::Archived,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Offline),
            1 => Some(Self::Draft),
            2 => Some(Self::Online),
            3 => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(label.trim()))
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Draft => "Draft",
            Self::Online => "Online",
            Self::Archived => "Archived",
        }
    }

    /// Accepts either the numeric code (as number or string) or the label.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(code) = crate::value::as_i64(value) {
            return Self::from_code(code);
        }
        value.as_str().and_then(Self::from_label)
    }
}

/// A processed content record, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub ctype: String,
    pub attributes: Attributes,
}

impl Record {
    pub fn new(ctype: impl Into<String>, mut attributes: Attributes) -> Self {
        let ctype = ctype.into();
        attributes.insert(CTYPE.to_string(), Value::String(ctype.clone()));
        Self { ctype, attributes }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn uuid(&self) -> Option<&str> {
        self.get_str(UUID)
    }

    /// Parsed uuid, if the stored identifier is a well-formed UUID.
    pub fn parsed_uuid(&self) -> Option<Uuid> {
        self.uuid().and_then(|u| Uuid::parse_str(u).ok())
    }

    pub fn state(&self) -> Option<RecordState> {
        self.attributes.get(STATE).and_then(RecordState::from_value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.attributes)
    }
}

/// A fresh v4 identifier in canonical hyphenated lowercase form.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as epoch seconds, the stored form of `created`/`updated`.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_roundtrips_codes_and_labels() {
        for state in RecordState::ALL {
            assert_eq!(RecordState::from_code(state.code()), Some(state));
            assert_eq!(RecordState::from_label(state.label()), Some(state));
        }
        assert_eq!(RecordState::from_label("online"), Some(RecordState::Online));
        assert_eq!(RecordState::from_code(7), None);
    }

    #[test]
    fn state_from_value_accepts_strings() {
        assert_eq!(
            RecordState::from_value(&json!("2")),
            Some(RecordState::Online)
        );
        assert_eq!(
            RecordState::from_value(&json!("Archived")),
            Some(RecordState::Archived)
        );
        assert_eq!(RecordState::from_value(&json!(null)), None);
    }

    #[test]
    fn record_always_carries_ctype() {
        let record = Record::new("event", Map::new());
        assert_eq!(record.get_str(CTYPE), Some("event"));
    }

    #[test]
    fn new_uuid_is_v4() {
        let id = new_uuid();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        let variant = id.chars().nth(19).unwrap();
        assert!(matches!(variant, '8' | '9' | 'a' | 'b'));
    }
}
