//! # Field Processing Pipeline
//!
//! Every field value crosses two independent, pluggable steps on its way
//! between storage and the caller:
//!
//! - a **processor**, chosen by the field's `type` (`relationSelect`,
//!   `jsonEditor`, `widget_slug`, ...), owns the storage representation;
//! - a **transformer**, chosen by the field's `transform` (`state`, `date`,
//!   `datetime`), owns display formatting.
//!
//! ```text
//!   read:   stored ──process_data──► ──after_find──► processed
//!   write:  input ──before_save──► (validate) ──process_data_pre_save──► stored
//!                                                   │
//!                               after the backend write: process_data_post_save
//! ```
//!
//! A type or transform with nothing registered passes the value through
//! untouched. That is the normal case for plain text fields, not an error.
//!
//! ## Resolution
//!
//! | Declared type | Looked up in | Key |
//! |---------------|--------------|-----|
//! | `widget_Foo` | widgets | `foo` |
//! | `relationSelect` | plugins | `relationselect` |
//!
//! The registry is filled once at startup ([`ProcessorRegistry::with_builtins`]
//! plus any `register_*` calls) and is read-only afterwards.

mod builtin;
mod transform;

pub use builtin::{
    slugify, AssetConnectorProcessor, CheckboxListProcessor, JsonEditorProcessor,
    RelationSelectProcessor, SlugWidget, SwitchInputProcessor,
};
pub use transform::{DateTransformer, DateTimeTransformer, StateTransformer};

use crate::error::{CrelishError, Result};
use crate::model::{Attributes, Record, CTYPE};
use crate::schema::{ContentTypeSchema, FieldDefinition};
use crate::store::StorageBackend;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const WIDGET_PREFIX: &str = "widget_";

/// What a processor sees about the field it works on.
pub struct FieldContext<'a> {
    pub ctype: &'a str,
    pub field: &'a FieldDefinition,
    /// The whole record as it stood before this field was processed.
    pub record: &'a Attributes,
}

/// Context for side effects that need the saved record's identity.
pub struct PostSaveContext<'a> {
    pub ctype: &'a str,
    pub uuid: &'a str,
    pub field: &'a FieldDefinition,
    pub record: &'a Attributes,
    pub store: &'a dyn StorageBackend,
}

/// Storage-level transform for one field type.
pub trait FieldProcessor: Send + Sync {
    /// Stored value to application value.
    fn process_data(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(value)
    }

    /// Application value to stored value.
    fn process_data_pre_save(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(value)
    }

    /// Runs once the parent record is durably written.
    fn process_data_post_save(&self, _ctx: &PostSaveContext<'_>, _value: &Value) -> Result<()> {
        Ok(())
    }
}

/// Display formatting for one named transform.
pub trait ValueTransformer: Send + Sync {
    fn after_find(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn before_save(&self, value: Value) -> Result<Value> {
        Ok(value)
    }
}

#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    plugins: HashMap<String, Arc<dyn FieldProcessor>>,
    widgets: HashMap<String, Arc<dyn FieldProcessor>>,
    transformers: HashMap<String, Arc<dyn ValueTransformer>>,
}

impl ProcessorRegistry {
    /// An empty registry: every field passes through.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_plugin("relationSelect", RelationSelectProcessor);
        registry.register_plugin("assetConnector", AssetConnectorProcessor);
        registry.register_plugin("checkboxList", CheckboxListProcessor);
        registry.register_plugin("jsonEditor", JsonEditorProcessor);
        registry.register_plugin("switchInput", SwitchInputProcessor);
        registry.register_widget("slug", SlugWidget);
        registry.register_transformer("state", StateTransformer);
        registry.register_transformer("date", DateTransformer);
        registry.register_transformer("datetime", DateTimeTransformer);
        registry
    }

    pub fn register_plugin(&mut self, field_type: &str, processor: impl FieldProcessor + 'static) {
        self.plugins
            .insert(field_type.to_ascii_lowercase(), Arc::new(processor));
    }

    /// Register a `widget_` type. The prefix is optional in `name`.
    pub fn register_widget(&mut self, name: &str, processor: impl FieldProcessor + 'static) {
        let name = name.strip_prefix(WIDGET_PREFIX).unwrap_or(name);
        self.widgets
            .insert(name.to_ascii_lowercase(), Arc::new(processor));
    }

    pub fn register_transformer(&mut self, name: &str, transformer: impl ValueTransformer + 'static) {
        self.transformers
            .insert(name.to_ascii_lowercase(), Arc::new(transformer));
    }

    pub fn processor_for(&self, field_type: &str) -> Option<&dyn FieldProcessor> {
        let processor = match field_type.strip_prefix(WIDGET_PREFIX) {
            Some(widget) => self.widgets.get(&widget.to_ascii_lowercase()),
            None => self.plugins.get(&field_type.to_ascii_lowercase()),
        };
        processor.map(Arc::as_ref)
    }

    pub fn transformer_for(&self, field: &FieldDefinition) -> Option<&dyn ValueTransformer> {
        field
            .transform
            .as_deref()
            .and_then(|name| self.transformers.get(&name.to_ascii_lowercase()))
            .map(Arc::as_ref)
    }

    /// Read path for one field.
    pub fn process_read(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        let mut value = value;
        if let Some(processor) = self.processor_for(&ctx.field.field_type) {
            value = processor.process_data(ctx, value)?;
        }
        if let Some(transformer) = self.transformer_for(ctx.field) {
            value = transformer.after_find(value)?;
        }
        Ok(value)
    }

    /// Inverse display formatting, the first step of the write path.
    pub fn apply_before_save(&self, field: &FieldDefinition, value: Value) -> Result<Value> {
        let Some(transformer) = self.transformer_for(field) else {
            return Ok(value);
        };
        // Transformers only know their own name; report the field instead.
        transformer.before_save(value).map_err(|e| match e {
            CrelishError::Processor { message, .. } => CrelishError::processor(&field.key, message),
            other => other,
        })
    }

    pub fn process_write(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        match self.processor_for(&ctx.field.field_type) {
            Some(processor) => processor.process_data_pre_save(ctx, value),
            None => Ok(value),
        }
    }

    /// Stored record to processed record.
    ///
    /// Fields the stored document lacks are backfilled with their fallback
    /// value first, so records written under an older schema still come back
    /// with every current field.
    pub fn process_record(&self, schema: &ContentTypeSchema, raw: &Attributes) -> Result<Record> {
        let stored = backfill(schema, raw);
        let mut processed = stored.clone();
        for field in &schema.fields {
            let value = stored.get(&field.key).cloned().unwrap_or(Value::Null);
            let ctx = FieldContext {
                ctype: &schema.type_name,
                field,
                record: &stored,
            };
            processed.insert(field.key.clone(), self.process_read(&ctx, value)?);
        }
        Ok(Record::new(schema.type_name.clone(), processed))
    }

    /// Run every schema field through its processor's pre-save step.
    ///
    /// Keys that are not schema fields are dropped, `ctype` included.
    pub fn prepare_for_storage(
        &self,
        schema: &ContentTypeSchema,
        attrs: &Attributes,
    ) -> Result<Attributes> {
        let mut stored = Attributes::new();
        for field in &schema.fields {
            let value = attrs.get(&field.key).cloned().unwrap_or(Value::Null);
            let ctx = FieldContext {
                ctype: &schema.type_name,
                field,
                record: attrs,
            };
            stored.insert(field.key.clone(), self.process_write(&ctx, value)?);
        }
        Ok(stored)
    }

    pub fn run_post_save(
        &self,
        schema: &ContentTypeSchema,
        uuid: &str,
        stored: &Attributes,
        store: &dyn StorageBackend,
    ) -> Result<()> {
        for field in &schema.fields {
            let Some(processor) = self.processor_for(&field.field_type) else {
                continue;
            };
            let value = stored.get(&field.key).unwrap_or(&Value::Null);
            let ctx = PostSaveContext {
                ctype: &schema.type_name,
                uuid,
                field,
                record: stored,
                store,
            };
            processor.process_data_post_save(&ctx, value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut plugins: Vec<_> = self.plugins.keys().collect();
        let mut widgets: Vec<_> = self.widgets.keys().collect();
        let mut transformers: Vec<_> = self.transformers.keys().collect();
        plugins.sort();
        widgets.sort();
        transformers.sort();
        f.debug_struct("ProcessorRegistry")
            .field("plugins", &plugins)
            .field("widgets", &widgets)
            .field("transformers", &transformers)
            .finish()
    }
}

/// Copy of `raw` with every missing schema field set to its fallback value.
pub fn backfill(schema: &ContentTypeSchema, raw: &Attributes) -> Attributes {
    let mut stored = raw.clone();
    stored.remove(CTYPE);
    for field in &schema.fields {
        if !stored.contains_key(&field.key) {
            stored.insert(field.key.clone(), field.fallback_value());
        }
    }
    stored
}
