//! # Content Type Schemas
//!
//! A content type (`ctype`) is defined by a JSON document listing its fields.
//! The loader turns that document into a [`ContentTypeSchema`]: an ordered,
//! validated field list that always contains the six system fields.
//!
//! ## Document Format
//!
//! ```json
//! {
//!   "key": "event",
//!   "label": "Event",
//!   "storage": "json",
//!   "sortDefault": { "startDate": "SORT_DESC" },
//!   "fields": [
//!     { "key": "title", "label": "Title", "type": "textInput",
//!       "rules": [["required"], ["string", { "max": 128 }]], "visibleInGrid": true },
//!     { "key": "startDate", "label": "Start", "type": "textInput", "transform": "date" }
//!   ]
//! }
//! ```
//!
//! - `storage`: `"db"` selects the relational backend, anything else (or
//!   nothing) the file backend.
//! - `sortDefault`: `{"field": .., "direction": ..}` or the legacy one-entry
//!   map `{"<field>": "SORT_ASC|SORT_DESC"}`.
//! - `rules`: each entry is a rule name or `[name, {params}]`.
//! - `valueKind`: `scalar`, `json` or `array`. Decided once here so that no
//!   backend has to guess whether a string holds JSON.
//!
//! ## System Fields
//!
//! `uuid`, `state`, `created`, `updated`, `from` and `to` are appended, in that
//! order, when the document does not declare them. A document that declares
//! one of them keeps its own definition.

mod loader;

pub use loader::{parse_schema, SchemaLoader};

use crate::query::SortDirection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Where records of a content type live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    File,
    Relational,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::File
    }
}

/// How a field's value is shaped in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Scalar,
    Json,
    Array,
}

impl ValueKind {
    /// Whether the stored value is structured and must be JSON-encoded in a column.
    pub fn is_structured(self) -> bool {
        !matches!(self, ValueKind::Scalar)
    }
}

/// One validation rule: a name plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// Grid sort configuration: a plain flag or a structured config object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sortable {
    Flag(bool),
    Config(Map<String, Value>),
}

impl Default for Sortable {
    fn default() -> Self {
        Sortable::Flag(false)
    }
}

impl Sortable {
    pub fn is_enabled(&self) -> bool {
        match self {
            Sortable::Flag(flag) => *flag,
            Sortable::Config(_) => true,
        }
    }
}

/// Default ordering of a content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDefault {
    pub field: String,
    pub direction: SortDirection,
}

/// Metadata for one field of a content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    pub label: String,
    pub field_type: String,
    pub transform: Option<String>,
    pub rules: Vec<RuleSpec>,
    pub visible_in_grid: bool,
    pub sortable: Sortable,
    pub config: Map<String, Value>,
    pub value_kind: ValueKind,
    pub default: Option<Value>,
    pub system: bool,
}

impl FieldDefinition {
    pub fn new(key: impl Into<String>, field_type: impl Into<String>) -> Self {
        let key = key.into();
        let field_type = field_type.into();
        let value_kind = infer_value_kind(&field_type, &Map::new());
        Self {
            label: key.clone(),
            key,
            field_type,
            transform: None,
            rules: Vec::new(),
            visible_in_grid: false,
            sortable: Sortable::default(),
            config: Map::new(),
            value_kind,
            default: None,
            system: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn in_grid(mut self) -> Self {
        self.visible_in_grid = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = Sortable::Flag(true);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// `true` when `config.multiple` is set (relations, asset lists).
    pub fn is_multiple(&self) -> bool {
        self.config
            .get("multiple")
            .map(|v| v.as_bool().unwrap_or_else(|| crate::value::as_i64(v) == Some(1)))
            .unwrap_or(false)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// The value to backfill when a stored record lacks this field.
    ///
    /// An explicit `default` wins over a `default` rule.
    pub fn fallback_value(&self) -> Value {
        if let Some(value) = &self.default {
            return value.clone();
        }
        self.rules
            .iter()
            .find(|r| r.name == "default")
            .and_then(|r| r.param("value").cloned())
            .unwrap_or(Value::Null)
    }
}

/// The normalized definition of one content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeSchema {
    pub type_name: String,
    pub label: String,
    pub storage_mode: StorageMode,
    pub fields: Vec<FieldDefinition>,
    pub sort_default: Option<SortDefault>,
}

impl ContentTypeSchema {
    /// Build a schema from user-declared fields, injecting the system fields.
    pub fn new(
        type_name: impl Into<String>,
        storage_mode: StorageMode,
        fields: Vec<FieldDefinition>,
    ) -> Self {
        let type_name = type_name.into();
        let mut schema = Self {
            label: type_name.clone(),
            type_name,
            storage_mode,
            fields,
            sort_default: None,
        };
        schema.inject_system_fields();
        schema
    }

    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.field(key).is_some()
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn grid_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.visible_in_grid)
    }

    fn inject_system_fields(&mut self) {
        for field in system_fields() {
            if !self.has_field(&field.key) {
                self.fields.push(field);
            }
        }
    }
}

/// Canonical definitions of the system fields, in injection order.
pub fn system_fields() -> Vec<FieldDefinition> {
    use crate::model::{CREATED, FROM, STATE, TO, UPDATED, UUID};
    vec![
        FieldDefinition::new(UUID, "textInput")
            .label("UUID")
            .rule(RuleSpec::new("safe"))
            .system(),
        FieldDefinition::new(STATE, "dropDownList")
            .label("State")
            .transform("state")
            .rule(RuleSpec::new("in").with_param("range", json!([0, 1, 2, 3])))
            .default_value(json!(1))
            .in_grid()
            .sortable()
            .system(),
        FieldDefinition::new(CREATED, "textInput")
            .label("Created")
            .rule(RuleSpec::new("integer"))
            .sortable()
            .system(),
        FieldDefinition::new(UPDATED, "textInput")
            .label("Updated")
            .rule(RuleSpec::new("integer"))
            .sortable()
            .system(),
        FieldDefinition::new(FROM, "textInput")
            .label("Publish from")
            .transform("datetime")
            .rule(RuleSpec::new("safe"))
            .system(),
        FieldDefinition::new(TO, "textInput")
            .label("Publish until")
            .transform("datetime")
            .rule(RuleSpec::new("safe"))
            .system(),
    ]
}

/// Derive the storage shape of a field from its type.
pub(crate) fn infer_value_kind(field_type: &str, config: &Map<String, Value>) -> ValueKind {
    let multiple = config
        .get("multiple")
        .map(|v| v.as_bool().unwrap_or_else(|| crate::value::as_i64(v) == Some(1)))
        .unwrap_or(false);
    match field_type.to_ascii_lowercase().as_str() {
        "relationselect" | "assetconnector" if multiple => ValueKind::Array,
        "checkboxlist" => ValueKind::Array,
        "jsoneditor" | "matrixconnector" => ValueKind::Json,
        _ => ValueKind::Scalar,
    }
}
