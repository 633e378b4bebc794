use super::cache::{CachedRecord, RecordCache, RecordList};
use super::slugs::SlugStore;
use super::{stamp_system_fields, with_retry, write_atomic, StorageBackend};
use crate::error::{CrelishError, Result};
use crate::model::{Attributes, Record, SLUG};
use crate::processors::ProcessorRegistry;
use crate::query::{FilterSpec, SortSpec};
use crate::schema::{ContentTypeSchema, StorageMode};
use crate::value::{is_empty, value_to_string};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

static SAFE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid id regex"));

/// File-backed store: `<root>/<ctype>/<uuid>.json`, one document per record.
///
/// Listings go through the shared [`RecordCache`]; single lookups read the
/// document directly.
pub struct FileStore {
    root: PathBuf,
    registry: Arc<ProcessorRegistry>,
    cache: Arc<RecordCache>,
    slugs: SlugStore,
    pretty: bool,
    retries: u32,
    scans: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<ProcessorRegistry>, cache: Arc<RecordCache>) -> Self {
        let root = root.into();
        Self {
            slugs: SlugStore::new(root.join("slugs.json")),
            root,
            registry,
            cache,
            pretty: true,
            retries: 3,
            scans: AtomicU64::new(0),
        }
    }

    pub fn with_pretty_json(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slugs(&self) -> &SlugStore {
        &self.slugs
    }

    /// Number of directory scans so far. Each cold listing costs one.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn type_dir(&self, ctype: &str) -> PathBuf {
        self.root.join(ctype)
    }

    pub fn record_path(&self, ctype: &str, uuid: &str) -> Result<PathBuf> {
        if !SAFE_ID.is_match(uuid) {
            return Err(CrelishError::Store(format!(
                "'{}' is not a usable record identifier",
                uuid
            )));
        }
        Ok(self.type_dir(ctype).join(format!("{}.json", uuid)))
    }

    fn read_document(path: &Path) -> Result<Option<Attributes>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(CrelishError::CorruptRecord {
                path: path.to_path_buf(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => Err(CrelishError::CorruptRecord {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Decode every document of a type. Corrupt documents are logged and skipped.
    fn scan(&self, schema: &ContentTypeSchema) -> Result<Vec<CachedRecord>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let dir = self.type_dir(&schema.type_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension().and_then(|e| e.to_str()) == Some("json")
                    && !p
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_document(&path) {
                Ok(Some(raw)) => {
                    let processed = self.registry.process_record(schema, &raw)?;
                    records.push(CachedRecord { raw, processed });
                }
                Ok(None) => {}
                Err(e @ CrelishError::CorruptRecord { .. }) => {
                    warn!(ctype = %schema.type_name, path = %path.display(), error = %e, "skipping corrupt record");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(ctype = %schema.type_name, count = records.len(), "scanned record directory");
        Ok(records)
    }

    /// Cached list of a type, scanning on a cold cache.
    fn load_all(&self, schema: &ContentTypeSchema) -> Result<RecordList> {
        if let Some(list) = self.cache.get(&schema.type_name) {
            return Ok(list);
        }
        let records = self.scan(schema)?;
        Ok(self.cache.populate(&schema.type_name, records))
    }

    fn select(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<CachedRecord>> {
        let list = self.load_all(schema)?;
        let mut matched: Vec<CachedRecord> = list
            .iter()
            .filter(|r| filter.matches(&r.raw))
            .cloned()
            .collect();
        sort.sort(&mut matched, |r| &r.raw);
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn encode(&self, data: &Attributes) -> Result<Vec<u8>> {
        Ok(if self.pretty {
            serde_json::to_vec_pretty(data)?
        } else {
            serde_json::to_vec(data)?
        })
    }

    fn update_slug(&self, schema: &ContentTypeSchema, uuid: &str, data: &Attributes) -> Result<()> {
        if !schema.has_field(SLUG) {
            return Ok(());
        }
        match data.get(SLUG).filter(|v| !is_empty(v)) {
            Some(slug) => self
                .slugs
                .upsert(&value_to_string(slug), &schema.type_name, uuid),
            None => self.slugs.remove_uuid(uuid).map(|_| ()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl StorageBackend for FileStore {
    fn mode(&self) -> StorageMode {
        StorageMode::File
    }

    fn find_one(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<Option<Record>> {
        let path = match self.record_path(&schema.type_name, uuid) {
            Ok(path) => path,
            // An identifier we could never have written cannot exist.
            Err(_) => return Ok(None),
        };
        match Self::read_document(&path)? {
            Some(raw) => Ok(Some(self.registry.process_record(schema, &raw)?)),
            None => Ok(None),
        }
    }

    fn find_all(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        Ok(self
            .select(schema, filter, sort, limit)?
            .into_iter()
            .map(|r| r.processed)
            .collect())
    }

    fn find_all_raw(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Attributes>> {
        Ok(self
            .select(schema, filter, sort, limit)?
            .into_iter()
            .map(|r| r.raw)
            .collect())
    }

    fn save(&self, schema: &ContentTypeSchema, mut data: Attributes, is_new: bool) -> Result<Record> {
        let ctype = &schema.type_name;
        let uuid = stamp_system_fields(&mut data, is_new);
        let path = self.record_path(ctype, &uuid)?;
        let content = self.encode(&data)?;
        let processed = self.registry.process_record(schema, &data)?;

        if let Err(e) = with_retry(self.retries, "write record", || write_atomic(&path, &content)) {
            error!(ctype = %ctype, uuid = %uuid, path = %path.display(), error = %e, "failed to write record");
            return Err(e);
        }
        debug!(ctype = %ctype, uuid = %uuid, is_new, "record written");

        // The document is the source of truth; the cache follows it at once.
        if let Err(e) = self.update_slug(schema, &uuid, &data) {
            warn!(ctype = %ctype, uuid = %uuid, error = %e, "failed to update slug index");
        }
        self.cache.upsert_entry(
            ctype,
            CachedRecord {
                raw: data,
                processed: processed.clone(),
            },
        );
        Ok(processed)
    }

    fn delete(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<bool> {
        let ctype = &schema.type_name;
        let Ok(path) = self.record_path(ctype, uuid) else {
            return Ok(false);
        };
        let removed = with_retry(self.retries, "delete record", || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        });
        let removed = match removed {
            Ok(removed) => removed,
            Err(e) => {
                error!(ctype = %ctype, uuid, error = %e, "failed to delete record");
                return Err(e);
            }
        };
        if removed {
            self.cache.remove_entry(ctype, uuid);
            if let Err(e) = self.slugs.remove_uuid(uuid) {
                warn!(ctype = %ctype, uuid, error = %e, "failed to update slug index");
            }
            debug!(ctype = %ctype, uuid, "record deleted");
        }
        Ok(removed)
    }

    fn flush(&self, ctype: &str) {
        self.cache.flush(ctype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStore, ContentTypeSchema) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(
            dir.path(),
            Arc::new(ProcessorRegistry::with_builtins()),
            Arc::new(RecordCache::in_memory(16, None)),
        );
        let schema = ContentTypeSchema::new(
            "event",
            StorageMode::File,
            vec![FieldDefinition::new("title", "textInput")],
        );
        (dir, store, schema)
    }

    fn attrs(v: Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn corrupt_documents_are_skipped() {
        let (dir, store, schema) = setup();
        store
            .save(&schema, attrs(json!({"title": "Good"})), true)
            .unwrap();
        fs::write(dir.path().join("event").join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("event").join("list.json"), "[1,2]").unwrap();

        let all = store
            .find_all(&schema, &FilterSpec::new(), &SortSpec::new(), None)
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("title"), Some("Good"));
    }

    #[test]
    fn find_one_on_missing_or_odd_ids_is_none() {
        let (_dir, store, schema) = setup();
        assert!(store.find_one(&schema, "nope").unwrap().is_none());
        assert!(store.find_one(&schema, "../escape").unwrap().is_none());
    }

    #[test]
    fn warm_listing_does_not_rescan() {
        let (_dir, store, schema) = setup();
        let all = || {
            store
                .find_all(&schema, &FilterSpec::new(), &SortSpec::new(), None)
                .unwrap()
        };
        assert!(all().is_empty());
        assert_eq!(store.scan_count(), 1);

        let saved = store
            .save(&schema, attrs(json!({"title": "One"})), true)
            .unwrap();
        assert_eq!(all().len(), 1);
        store.delete(&schema, saved.uuid().unwrap()).unwrap();
        assert!(all().is_empty());
        assert_eq!(store.scan_count(), 1);

        store.flush("event");
        all();
        assert_eq!(store.scan_count(), 2);
    }

    fn titles(store: &FileStore, schema: &ContentTypeSchema) -> Vec<String> {
        store
            .find_all(schema, &FilterSpec::new(), &SortSpec::new(), None)
            .unwrap()
            .iter()
            .map(|r| r.get_str("title").unwrap().to_string())
            .collect()
    }

    /// Save a slugged record and warm the listing cache.
    fn slugged(store: &FileStore, schema: &ContentTypeSchema) -> String {
        let saved = store
            .save(schema, attrs(json!({"title": "Draft", "slug": "launch"})), true)
            .unwrap();
        assert_eq!(titles(store, schema), vec!["Draft"]);
        saved.uuid().unwrap().to_string()
    }

    fn slug_schema() -> ContentTypeSchema {
        ContentTypeSchema::new(
            "event",
            StorageMode::File,
            vec![FieldDefinition::new("title", "textInput"), FieldDefinition::new("slug", "textInput")],
        )
    }

    #[test]
    fn update_survives_corrupt_slug_index() {
        let (_dir, store, _) = setup();
        let schema = slug_schema();
        let uuid = slugged(&store, &schema);
        fs::write(store.slugs().path(), "{ not json").unwrap();

        store
            .save(&schema, attrs(json!({"uuid": uuid, "title": "Final", "slug": "launch"})), false)
            .unwrap();
        assert_eq!(titles(&store, &schema), vec!["Final"]);
        assert_eq!(store.scan_count(), 1);
        assert_eq!(store.slugs().resolve("launch").unwrap().map(|t| t.uuid), Some(uuid.clone()));
        assert_eq!(
            store.find_one(&schema, &uuid).unwrap().unwrap().get_str("title"),
            Some("Final")
        );
    }

    #[test]
    fn update_reaches_cache_when_slug_index_is_unwritable() {
        let (_dir, store, _) = setup();
        let schema = slug_schema();
        let uuid = slugged(&store, &schema);
        fs::remove_file(store.slugs().path()).unwrap();
        fs::create_dir(store.slugs().path()).unwrap();

        store
            .save(&schema, attrs(json!({"uuid": uuid, "title": "Final", "slug": "moved"})), false)
            .unwrap();
        assert_eq!(titles(&store, &schema), vec!["Final"]);
        assert!(store.delete(&schema, &uuid).unwrap());
        assert!(titles(&store, &schema).is_empty());
    }

    #[test]
    fn compact_json_when_configured() {
        let (dir, store, schema) = setup();
        let store = store.with_pretty_json(false);
        let saved = store
            .save(&schema, attrs(json!({"title": "One"})), true)
            .unwrap();
        let path = dir
            .path()
            .join("event")
            .join(format!("{}.json", saved.uuid().unwrap()));
        let content = fs::read_to_string(path).unwrap();
        assert!(!content.contains('\n'));
    }

    #[test]
    fn delete_twice_reports_false() {
        let (_dir, store, schema) = setup();
        let saved = store
            .save(&schema, attrs(json!({"title": "One"})), true)
            .unwrap();
        let uuid = saved.uuid().unwrap().to_string();
        assert!(store.delete(&schema, &uuid).unwrap());
        assert!(!store.delete(&schema, &uuid).unwrap());
    }
}
