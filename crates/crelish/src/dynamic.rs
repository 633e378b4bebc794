//! # Dynamic Records
//!
//! [`DynamicModel`] is one record of a content type being edited: an
//! attribute map bound to its schema, plus the backend that persists it.
//!
//! Attributes hold the processed (display) form. A loaded record can be
//! changed and saved without converting anything by hand; the write path
//! turns display values back into stored values:
//!
//! 1. transformer `before_save` per field (`"Online"` -> `2`);
//! 2. defaults for empty values, then the field rules;
//! 3. processor `process_data_pre_save` per field;
//! 4. the backend write, which stamps `uuid`/`created`/`updated`;
//! 5. processor `process_data_post_save` per field (relation rows).
//!
//! Steps 1 to 3 only collect problems into [`ValidationErrors`]; nothing is
//! written unless all of them pass.
//!
//! The identifier of a record that exists in storage never changes. Setting
//! a different `uuid` on such a record is undone at save time.

use crate::error::{CrelishError, Result};
use crate::model::{Attributes, Record, RecordState, UUID};
use crate::processors::ProcessorRegistry;
use crate::query::{FilterSpec, SortSpec};
use crate::schema::{ContentTypeSchema, FieldDefinition};
use crate::store::StorageBackend;
use crate::validation::{check_rule, is_deferred, ValidationErrors};
use crate::value::{is_empty, value_to_string};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct DynamicModel {
    schema: Arc<ContentTypeSchema>,
    backend: Arc<dyn StorageBackend>,
    registry: Arc<ProcessorRegistry>,
    attributes: Attributes,
    // Set once the record exists in storage.
    persisted_uuid: Option<String>,
    errors: ValidationErrors,
}

impl DynamicModel {
    /// A new, unsaved record.
    pub fn new(
        schema: Arc<ContentTypeSchema>,
        backend: Arc<dyn StorageBackend>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            schema,
            backend,
            registry,
            attributes: Attributes::new(),
            persisted_uuid: None,
            errors: ValidationErrors::new(),
        }
    }

    /// Load an existing record. `Ok(None)` when there is none with that uuid.
    pub fn load(
        schema: Arc<ContentTypeSchema>,
        backend: Arc<dyn StorageBackend>,
        registry: Arc<ProcessorRegistry>,
        uuid: &str,
    ) -> Result<Option<Self>> {
        let Some(record) = backend.find_one(&schema, uuid)? else {
            return Ok(None);
        };
        let mut model = Self::new(schema, backend, registry);
        model.persisted_uuid = record.uuid().map(str::to_string);
        model.attributes = record.attributes;
        Ok(Some(model))
    }

    pub fn ctype(&self) -> &str {
        &self.schema.type_name
    }

    pub fn schema(&self) -> &ContentTypeSchema {
        &self.schema
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Merge `values` into the current attributes.
    pub fn set_attributes(&mut self, values: Attributes) -> &mut Self {
        self.attributes.extend(values);
        self
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn uuid(&self) -> Option<&str> {
        self.persisted_uuid
            .as_deref()
            .or_else(|| self.attributes.get(UUID).and_then(Value::as_str))
            .filter(|u| !u.is_empty())
    }

    pub fn state(&self) -> Option<RecordState> {
        self.attributes.get(crate::model::STATE).and_then(RecordState::from_value)
    }

    pub fn is_new(&self) -> bool {
        self.persisted_uuid.is_none()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Check the current attributes against the schema rules.
    ///
    /// Messages end up in [`DynamicModel::errors`].
    pub fn validate(&mut self) -> bool {
        match self.storage_form() {
            Ok(_) => {
                self.errors.clear();
                true
            }
            Err(CrelishError::Validation(errors)) => {
                self.errors = errors;
                false
            }
            Err(e) => {
                warn!(ctype = %self.ctype(), error = %e, "validation could not complete");
                self.errors = ValidationErrors::new();
                self.errors.add(UUID, e.to_string());
                false
            }
        }
    }

    /// Validate and persist. Returns the saved record in processed form.
    pub fn try_save(&mut self) -> Result<Record> {
        if let Some(uuid) = &self.persisted_uuid {
            self.attributes.insert(UUID.to_string(), Value::String(uuid.clone()));
        }

        let mut stored = match self.storage_form() {
            Ok(stored) => stored,
            Err(CrelishError::Validation(errors)) => {
                self.errors = errors.clone();
                return Err(CrelishError::Validation(errors));
            }
            Err(e) => return Err(e),
        };
        self.errors.clear();

        let record = self.backend.save(&self.schema, stored.clone(), self.is_new())?;
        let uuid = record
            .uuid()
            .map(str::to_string)
            .ok_or_else(|| CrelishError::Store("saved record has no uuid".to_string()))?;
        stored.insert(UUID.to_string(), Value::String(uuid.clone()));
        self.registry
            .run_post_save(&self.schema, &uuid, &stored, self.backend.as_ref())?;

        debug!(ctype = %self.ctype(), uuid = %uuid, "record saved");
        self.persisted_uuid = Some(uuid);
        self.attributes = record.attributes.clone();
        Ok(record)
    }

    /// Boolean form of [`DynamicModel::try_save`].
    ///
    /// Validation problems are left in [`DynamicModel::errors`]; storage
    /// failures are logged.
    pub fn save(&mut self) -> bool {
        match self.try_save() {
            Ok(_) => true,
            Err(CrelishError::Validation(_)) => false,
            Err(e) => {
                error!(ctype = %self.ctype(), uuid = ?self.uuid(), error = %e, "save failed");
                false
            }
        }
    }

    /// Remove the record from storage. `Ok(false)` for a record never saved.
    pub fn delete(&mut self) -> Result<bool> {
        let Some(uuid) = self.persisted_uuid.clone() else {
            return Ok(false);
        };
        let removed = self.backend.delete(&self.schema, &uuid)?;
        if removed {
            self.persisted_uuid = None;
        }
        Ok(removed)
    }

    /// Steps 1 to 3 of the write path.
    fn storage_form(&self) -> Result<Attributes> {
        let mut errors = ValidationErrors::new();
        let mut candidate = Attributes::new();

        for field in &self.schema.fields {
            let value = self.attributes.get(&field.key).cloned().unwrap_or(Value::Null);
            let value = match self.registry.apply_before_save(field, value) {
                Ok(value) => value,
                Err(CrelishError::Processor { message, .. }) => {
                    errors.add(&field.key, message);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let value = self.with_default(field, value);

            for rule in field.rules.iter().filter(|r| !is_deferred(r)) {
                if let Some(message) = check_rule(rule, &field.label, &value) {
                    errors.add(&field.key, message);
                }
            }
            if field.rules.iter().any(|r| r.name == "unique") && !is_empty(&value) {
                if let Some(message) = self.check_unique(field, &value)? {
                    errors.add(&field.key, message);
                }
            }
            candidate.insert(field.key.clone(), value);
        }

        if !errors.is_empty() {
            return Err(CrelishError::Validation(errors));
        }

        self.registry
            .prepare_for_storage(&self.schema, &candidate)
            .map_err(|e| match e {
                CrelishError::Processor { field, message } => {
                    let mut errors = ValidationErrors::new();
                    errors.add(field, message);
                    CrelishError::Validation(errors)
                }
                other => other,
            })
    }

    /// `default` rules fill empty values always; a field `default` only on new records.
    fn with_default(&self, field: &FieldDefinition, value: Value) -> Value {
        if !is_empty(&value) {
            return value;
        }
        let has_rule = field.rules.iter().any(|r| r.name == "default");
        if has_rule || (self.is_new() && field.default.is_some()) {
            let fallback = field.fallback_value();
            if !fallback.is_null() {
                return fallback;
            }
        }
        value
    }

    fn check_unique(&self, field: &FieldDefinition, value: &Value) -> Result<Option<String>> {
        let filter = FilterSpec::new().strict(field.key.clone(), value.clone());
        let own = self.uuid();
        let taken = self
            .backend
            .find_all_raw(&self.schema, &filter, &SortSpec::new(), None)?
            .iter()
            .any(|other| other.get(UUID).and_then(Value::as_str) != own);
        Ok(taken.then(|| {
            format!(
                "{} \"{}\" has already been taken.",
                field.label,
                value_to_string(value)
            )
        }))
    }
}

impl std::fmt::Debug for DynamicModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicModel")
            .field("ctype", &self.schema.type_name)
            .field("uuid", &self.uuid())
            .field("is_new", &self.is_new())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CrelishError;
    use crate::model::{CREATED, STATE, UPDATED, UUID};
    use crate::test_utils::TestEnv;
    use serde_json::json;

    #[test]
    fn new_record_gets_identity_and_draft_state() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "Launch").set("startDate", "2024-01-01");

        let record = model.try_save().unwrap();
        assert!(record.parsed_uuid().is_some());
        assert_eq!(record.get(STATE), Some(&json!("Draft")));
        assert_eq!(record.get("startDate"), Some(&json!("01.01.2024")));
        assert!(!model.is_new());
    }

    #[test]
    fn required_and_length_rules_block_the_write() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "");
        assert!(!model.save());
        assert!(model.errors().has("title"));
        assert!(model.is_new());
        assert_eq!(env.file_store().scan_count(), 0);
    }

    #[test]
    fn unparsable_dates_are_validation_errors() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "Launch").set("startDate", "someday");
        match model.try_save() {
            Err(CrelishError::Validation(errors)) => assert!(errors.has("startDate")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn resaving_keeps_uuid_and_moves_updated_forward() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "Launch");
        let first = model.try_save().unwrap();
        let uuid = first.uuid().unwrap().to_string();
        let created = first.get(CREATED).and_then(|v| v.as_i64()).unwrap();

        let mut loaded = env.crelish.load_model("event", &uuid).unwrap().unwrap();
        loaded.set(UUID, "someone-else").set("title", "Launch v2");
        let second = loaded.try_save().unwrap();

        assert_eq!(second.uuid(), Some(uuid.as_str()));
        assert_eq!(second.get("title"), Some(&json!("Launch v2")));
        assert_eq!(second.get(CREATED).and_then(|v| v.as_i64()), Some(created));
        assert!(second.get(UPDATED).and_then(|v| v.as_i64()).unwrap() >= created);
    }

    #[test]
    fn display_state_labels_are_stored_as_codes() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "Launch").set(STATE, "Online");
        let record = model.try_save().unwrap();

        let raw = env
            .crelish
            .data("event")
            .unwrap()
            .raw_all()
            .unwrap();
        assert_eq!(raw[0].get(STATE), Some(&json!(2)));
        assert_eq!(record.get(STATE), Some(&json!("Online")));
    }

    #[test]
    fn unique_ignores_the_record_itself() {
        let env = TestEnv::new();
        let mut first = env.crelish.model("article").unwrap();
        first.set("headline", "Hello").set("code", "A-1");
        first.try_save().unwrap();
        // Saving the same record again must not collide with itself.
        assert!(first.save(), "{}", first.errors());

        let mut second = env.crelish.model("article").unwrap();
        second.set("headline", "Other").set("code", "A-1");
        assert!(!second.save());
        assert!(second.errors().has("code"));
    }

    #[test]
    fn delete_of_unsaved_record_is_false() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        assert!(!model.delete().unwrap());

        model.set("title", "Launch");
        model.try_save().unwrap();
        assert!(model.delete().unwrap());
        assert!(model.is_new());
    }
}
