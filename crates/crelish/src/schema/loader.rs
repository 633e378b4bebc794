use super::{
    infer_value_kind, ContentTypeSchema, FieldDefinition, RuleSpec, SortDefault, Sortable,
    StorageMode, ValueKind,
};
use crate::error::{CrelishError, Result};
use crate::query::SortDirection;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

static FIELD_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));
static CTYPE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static regex"));

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDocument {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    sort_default: Option<Value>,
    #[serde(default)]
    fields: Vec<FieldDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDocument {
    key: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(rename = "type", default)]
    field_type: Option<String>,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default)]
    rules: Vec<Value>,
    #[serde(default)]
    visible_in_grid: Option<bool>,
    #[serde(default)]
    sortable: Option<Sortable>,
    #[serde(default)]
    config: Option<Map<String, Value>>,
    #[serde(default)]
    value_kind: Option<ValueKind>,
    #[serde(default)]
    default: Option<Value>,
}

struct CachedSchema {
    mtime: Option<SystemTime>,
    schema: Arc<ContentTypeSchema>,
}

/// Loads schema documents from `{dir}/{ctype}.json`.
///
/// Parsed schemas are cached for the life of the loader and re-read when the
/// document's mtime changes.
pub struct SchemaLoader {
    dir: PathBuf,
    cache: RwLock<HashMap<String, CachedSchema>>,
}

impl SchemaLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ctype: &str) -> PathBuf {
        self.dir.join(format!("{}.json", ctype))
    }

    pub fn load(&self, ctype: &str) -> Result<Arc<ContentTypeSchema>> {
        if !CTYPE_NAME.is_match(ctype) {
            return Err(CrelishError::SchemaNotFound(ctype.to_string()));
        }
        let path = self.path_for(ctype);
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(CrelishError::SchemaNotFound(ctype.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CrelishError::SchemaNotFound(ctype.to_string()))
            }
            Err(e) => return Err(CrelishError::Io(e)),
        };
        let mtime = meta.modified().ok();

        if let Some(cached) = self.cache.read().get(ctype) {
            if cached.mtime.is_some() && cached.mtime == mtime {
                return Ok(Arc::clone(&cached.schema));
            }
        }

        debug!(ctype, path = %path.display(), "loading schema");
        let content = fs::read_to_string(&path)?;
        let schema = Arc::new(parse_schema(ctype, &content)?);
        self.cache.write().insert(
            ctype.to_string(),
            CachedSchema {
                mtime,
                schema: Arc::clone(&schema),
            },
        );
        Ok(schema)
    }

    /// Drop the cached schema for one type; the next `load` re-reads it.
    pub fn refresh(&self, ctype: &str) {
        self.cache.write().remove(ctype);
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Content type names with a schema document, sorted.
    pub fn list_types(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut types = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if CTYPE_NAME.is_match(stem) {
                    types.push(stem.to_string());
                }
            }
        }
        types.sort();
        Ok(types)
    }
}

/// Parse a schema document and normalize it.
pub fn parse_schema(ctype: &str, content: &str) -> Result<ContentTypeSchema> {
    let parse_err = |reason: String| CrelishError::SchemaParse {
        ctype: ctype.to_string(),
        reason,
    };

    let doc: SchemaDocument = serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;

    let storage_mode = match doc.storage.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("json") | Some("file") => StorageMode::File,
        Some("db") | Some("relational") => StorageMode::Relational,
        Some(other) => return Err(parse_err(format!("unknown storage mode '{}'", other))),
    };

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(doc.fields.len());
    for field in doc.fields {
        if !FIELD_KEY.is_match(&field.key) {
            return Err(parse_err(format!("invalid field key '{}'", field.key)));
        }
        if !seen.insert(field.key.clone()) {
            return Err(parse_err(format!("duplicate field key '{}'", field.key)));
        }
        fields.push(build_field(field).map_err(parse_err)?);
    }

    let sort_default = match doc.sort_default {
        Some(value) => parse_sort_default(&value).map_err(parse_err)?,
        None => None,
    };

    let mut schema = ContentTypeSchema::new(ctype, storage_mode, fields);
    schema.label = doc.label.unwrap_or_else(|| ctype.to_string());
    schema.sort_default = sort_default;
    Ok(schema)
}

fn build_field(doc: FieldDocument) -> std::result::Result<FieldDefinition, String> {
    let field_type = doc.field_type.unwrap_or_else(|| "textInput".to_string());
    let config = doc.config.unwrap_or_default();
    let value_kind = doc
        .value_kind
        .unwrap_or_else(|| infer_value_kind(&field_type, &config));
    let rules = doc
        .rules
        .iter()
        .map(parse_rule)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("field '{}': {}", doc.key, e))?;

    Ok(FieldDefinition {
        label: doc.label.unwrap_or_else(|| doc.key.clone()),
        key: doc.key,
        field_type,
        transform: doc.transform.filter(|t| !t.trim().is_empty()),
        rules,
        visible_in_grid: doc.visible_in_grid.unwrap_or(false),
        sortable: doc.sortable.unwrap_or_default(),
        config,
        value_kind,
        default: doc.default,
        system: false,
    })
}

fn parse_rule(value: &Value) -> std::result::Result<RuleSpec, String> {
    match value {
        Value::String(name) => Ok(RuleSpec::new(name.clone())),
        Value::Array(items) => {
            let name = items
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| format!("rule {} has no name", value))?;
            let mut rule = RuleSpec::new(name);
            match items.get(1) {
                None => {}
                Some(Value::Object(params)) => rule.params = params.clone(),
                Some(other) => {
                    rule.params.insert("value".to_string(), other.clone());
                }
            }
            Ok(rule)
        }
        other => Err(format!("unsupported rule {}", other)),
    }
}

fn parse_sort_default(value: &Value) -> std::result::Result<Option<SortDefault>, String> {
    let obj = match value {
        Value::Null => return Ok(None),
        Value::Object(obj) => obj,
        other => return Err(format!("sortDefault must be an object, got {}", other)),
    };

    if let Some(field) = obj.get("field").and_then(Value::as_str) {
        let direction = match obj.get("direction").and_then(Value::as_str) {
            Some(token) => SortDirection::parse(token)
                .ok_or_else(|| format!("unknown sort direction '{}'", token))?,
            None => SortDirection::Asc,
        };
        return Ok(Some(SortDefault {
            field: field.to_string(),
            direction,
        }));
    }

    // Legacy form: {"<field>": "SORT_DESC"}
    match obj.iter().next() {
        Some((field, dir)) => {
            let token = dir.as_str().unwrap_or("asc");
            let direction = SortDirection::parse(token)
                .ok_or_else(|| format!("unknown sort direction '{}'", token))?;
            Ok(Some(SortDefault {
                field: field.clone(),
                direction,
            }))
        }
        None => Ok(None),
    }
}
