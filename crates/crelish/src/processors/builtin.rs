//! Processors for the field types every installation ships with.

use super::{FieldContext, FieldProcessor, PostSaveContext};
use crate::error::{CrelishError, Result};
use crate::model::UUID;
use crate::value::{is_empty, value_to_string};
use serde_json::Value;

/// Reduce a reference to its uuid: a bare string, or an object carrying `uuid`.
fn reference_uuid(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map.get(UUID).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Accept a list as an array, a JSON-encoded array or a comma separated string.
fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str(trimmed) {
                    return items;
                }
            }
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect()
        }
        other => vec![other],
    }
}

fn normalize_references(ctx: &FieldContext<'_>, value: Value) -> Value {
    if ctx.field.is_multiple() {
        let uuids: Vec<Value> = as_list(value)
            .iter()
            .filter_map(reference_uuid)
            .map(Value::String)
            .collect();
        Value::Array(uuids)
    } else {
        let single = match value {
            Value::Array(items) => items.first().and_then(reference_uuid),
            other => reference_uuid(&other),
        };
        single.map(Value::String).unwrap_or(Value::Null)
    }
}

/// Links to records of another content type (`config.ctype`).
///
/// Single relations store one uuid, multiple relations a uuid list. In a
/// relational store a multiple relation also mirrors its list into the
/// junction table once the parent row exists.
pub struct RelationSelectProcessor;

impl FieldProcessor for RelationSelectProcessor {
    fn process_data(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(normalize_references(ctx, value))
    }

    fn process_data_pre_save(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(normalize_references(ctx, value))
    }

    fn process_data_post_save(&self, ctx: &PostSaveContext<'_>, value: &Value) -> Result<()> {
        if !ctx.field.is_multiple() {
            return Ok(());
        }
        let related: Vec<String> = value
            .as_array()
            .map(|items| items.iter().filter_map(reference_uuid).collect())
            .unwrap_or_default();
        ctx.store
            .sync_relations(ctx.ctype, ctx.uuid, &ctx.field.key, &related)
    }
}

/// References to asset records. Editors often post the whole asset object;
/// only its uuid is kept.
pub struct AssetConnectorProcessor;

impl FieldProcessor for AssetConnectorProcessor {
    fn process_data(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(normalize_references(ctx, value))
    }

    fn process_data_pre_save(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(normalize_references(ctx, value))
    }
}

pub struct CheckboxListProcessor;

impl FieldProcessor for CheckboxListProcessor {
    fn process_data(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(Value::Array(as_list(value)))
    }

    fn process_data_pre_save(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(Value::Array(as_list(value)))
    }
}

/// Free-form JSON. Strings are decoded; anything else is already structured.
pub struct JsonEditorProcessor;

impl FieldProcessor for JsonEditorProcessor {
    fn process_data(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        match value {
            Value::String(s) => Ok(serde_json::from_str(&s).unwrap_or(Value::String(s))),
            other => Ok(other),
        }
    }

    fn process_data_pre_save(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        match value {
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => serde_json::from_str(&s).map_err(|e| {
                CrelishError::processor(&ctx.field.key, format!("invalid JSON: {}", e))
            }),
            other => Ok(other),
        }
    }
}

pub struct SwitchInputProcessor;

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        other => matches!(
            value_to_string(other).trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
    }
}

impl FieldProcessor for SwitchInputProcessor {
    fn process_data(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(Value::Bool(truthy(&value)))
    }

    fn process_data_pre_save(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        Ok(Value::Bool(truthy(&value)))
    }
}

/// `widget_slug`: derives a URL slug from `config.source` (default `title`)
/// when the editor left the field empty.
pub struct SlugWidget;

impl FieldProcessor for SlugWidget {
    fn process_data_pre_save(&self, ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
        if !is_empty(&value) {
            return Ok(Value::String(slugify(&value_to_string(&value))));
        }
        let source = ctx.field.config_str("source").unwrap_or("title");
        let derived = ctx
            .record
            .get(source)
            .map(value_to_string)
            .map(|s| slugify(&s))
            .unwrap_or_default();
        if derived.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(Value::String(derived))
        }
    }
}

/// Lowercase ASCII slug: runs of anything that is not a letter or digit
/// collapse to a single `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars().flat_map(fold_char) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Transliterate the Latin letters editors type most.
fn fold_char(ch: char) -> Vec<char> {
    match ch {
        'ä' | 'Ä' => vec!['a', 'e'],
        'ö' | 'Ö' => vec!['o', 'e'],
        'ü' | 'Ü' => vec!['u', 'e'],
        'ß' => vec!['s', 's'],
        'à' | 'á' | 'â' | 'ã' | 'å' | 'À' | 'Á' | 'Â' => vec!['a'],
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' => vec!['e'],
        'ì' | 'í' | 'î' | 'ï' => vec!['i'],
        'ò' | 'ó' | 'ô' | 'õ' => vec!['o'],
        'ù' | 'ú' | 'û' => vec!['u'],
        'ç' | 'Ç' => vec!['c'],
        'ñ' | 'Ñ' => vec!['n'],
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;
    use crate::schema::FieldDefinition;
    use serde_json::json;

    fn run_pre_save<P: FieldProcessor>(p: &P, field: &FieldDefinition, record: &Attributes, value: Value) -> Value {
        let ctx = FieldContext {
            ctype: "event",
            field,
            record,
        };
        p.process_data_pre_save(&ctx, value).unwrap()
    }

    fn multi(key: &str, field_type: &str) -> FieldDefinition {
        let mut field = FieldDefinition::new(key, field_type);
        field.config.insert("multiple".into(), json!(true));
        field
    }

    #[test]
    fn relation_accepts_objects_strings_and_json() {
        let record = Attributes::new();
        let single = FieldDefinition::new("author", "relationSelect");
        assert_eq!(
            run_pre_save(&RelationSelectProcessor, &single, &record, json!({"uuid": "u-1", "name": "x"})),
            json!("u-1")
        );
        assert_eq!(
            run_pre_save(&RelationSelectProcessor, &single, &record, json!("")),
            Value::Null
        );

        let many = multi("speakers", "relationSelect");
        assert_eq!(
            run_pre_save(&RelationSelectProcessor, &many, &record, json!("[\"a\",\"b\"]")),
            json!(["a", "b"])
        );
        assert_eq!(
            run_pre_save(&RelationSelectProcessor, &many, &record, json!("a, b")),
            json!(["a", "b"])
        );
        assert_eq!(
            run_pre_save(&AssetConnectorProcessor, &many, &record, json!([{"uuid": "img"}, 7])),
            json!(["img"])
        );
    }

    #[test]
    fn json_editor_rejects_broken_json() {
        let field = FieldDefinition::new("data", "jsonEditor");
        let record = Attributes::new();
        let ctx = FieldContext {
            ctype: "event",
            field: &field,
            record: &record,
        };
        let err = JsonEditorProcessor
            .process_data_pre_save(&ctx, json!("{nope"))
            .unwrap_err();
        assert!(matches!(err, CrelishError::Processor { ref field, .. } if field == "data"));
        assert_eq!(
            JsonEditorProcessor.process_data_pre_save(&ctx, json!("{\"a\":1}")).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn switch_coerces_to_bool() {
        let field = FieldDefinition::new("featured", "switchInput");
        let record = Attributes::new();
        for (input, expected) in [(json!("on"), true), (json!(1), true), (json!("0"), false), (Value::Null, false)] {
            assert_eq!(run_pre_save(&SwitchInputProcessor, &field, &record, input), json!(expected));
        }
    }

    #[test]
    fn slug_derives_from_source_field() {
        let field = FieldDefinition::new("slug", "widget_slug");
        let record = json!({"title": "Größte Party: 2024!"}).as_object().cloned().unwrap();
        assert_eq!(
            run_pre_save(&SlugWidget, &field, &record, Value::Null),
            json!("groesste-party-2024")
        );
        assert_eq!(
            run_pre_save(&SlugWidget, &field, &record, json!("Custom Path")),
            json!("custom-path")
        );
    }

    #[test]
    fn slugify_trims_separators() {
        assert_eq!(slugify("  --Hello,   World--  "), "hello-world");
        assert_eq!(slugify(""), "");
    }
}
