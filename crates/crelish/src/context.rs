//! # Crelish Context
//!
//! The composition root. [`Crelish::open`] wires, once per process:
//!
//! ```text
//! CrelishConfig
//!   ├── SchemaLoader        (schema_dir)
//!   ├── ProcessorRegistry   (built-ins + caller registrations)
//!   ├── ModelResolver       (models_dir, cache_dir)
//!   ├── RecordCache         (moka, cache_ttl_secs)
//!   └── StorageFactory
//!         ├── FileStore       (content_root)
//!         └── RelationalStore (database, opened on first relational type)
//! ```
//!
//! Everything a caller needs afterwards goes through [`Crelish::data`] and
//! [`Crelish::model`]; neither exposes which backend a type lives in.

use crate::config::{CrelishConfig, DatabaseLocation};
use crate::dynamic::DynamicModel;
use crate::error::Result;
use crate::manager::DataManager;
use crate::processors::ProcessorRegistry;
use crate::resolver::ModelResolver;
use crate::schema::{ContentTypeSchema, SchemaLoader};
use crate::store::{FileStore, RecordCache, RelationalStore, SlugTarget, StorageBackend, StorageFactory};
use std::sync::Arc;
use tracing::debug;

pub struct Crelish {
    config: CrelishConfig,
    schemas: SchemaLoader,
    registry: Arc<ProcessorRegistry>,
    resolver: Arc<ModelResolver>,
    cache: Arc<RecordCache>,
    storage: StorageFactory,
}

impl Crelish {
    /// Open with the built-in processors and transformers.
    pub fn open(config: CrelishConfig) -> Result<Self> {
        Self::open_with_registry(config, ProcessorRegistry::with_builtins())
    }

    /// Open with a caller-prepared registry, e.g. one with extra widgets.
    pub fn open_with_registry(config: CrelishConfig, registry: ProcessorRegistry) -> Result<Self> {
        let registry = Arc::new(registry);
        let schemas = SchemaLoader::new(config.schema_dir());
        let resolver = Arc::new(
            ModelResolver::new(config.models_dir())
                .with_cache_dir(config.cache_dir())
                .with_debug(config.debug),
        );
        let cache = Arc::new(RecordCache::in_memory(config.cache_capacity, config.cache_ttl()));

        let file = FileStore::new(config.content_root.clone(), registry.clone(), cache.clone())
            .with_pretty_json(config.pretty_json)
            .with_retries(config.write_retries);

        let database = config.database_location();
        let retries = config.write_retries;
        let sql_registry = registry.clone();
        let sql_resolver = resolver.clone();
        let storage = StorageFactory::new(Arc::new(file), move || {
            let store = match &database {
                DatabaseLocation::Memory => RelationalStore::open_in_memory(sql_registry.clone())?,
                DatabaseLocation::File(path) => RelationalStore::open(path, sql_registry.clone())?,
            };
            debug!(database = ?database, "relational store opened");
            Ok(store.with_resolver(sql_resolver.clone()).with_retries(retries))
        });

        debug!(content_root = %config.content_root.display(), "crelish opened");
        Ok(Self {
            config,
            schemas,
            registry,
            resolver,
            cache,
            storage,
        })
    }

    pub fn config(&self) -> &CrelishConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    pub fn schemas(&self) -> &SchemaLoader {
        &self.schemas
    }

    pub fn storage(&self) -> &StorageFactory {
        &self.storage
    }

    pub fn schema(&self, ctype: &str) -> Result<Arc<ContentTypeSchema>> {
        self.schemas.load(ctype)
    }

    pub fn backend(&self, schema: &ContentTypeSchema) -> Result<Arc<dyn StorageBackend>> {
        self.storage.for_schema(schema)
    }

    /// Query façade for `ctype` with default settings.
    pub fn data(&self, ctype: &str) -> Result<DataManager> {
        let schema = self.schema(ctype)?;
        let backend = self.backend(&schema)?;
        Ok(DataManager::new(schema, backend, self.config.page_size))
    }

    /// A new, unsaved record of `ctype`.
    pub fn model(&self, ctype: &str) -> Result<DynamicModel> {
        let schema = self.schema(ctype)?;
        let backend = self.backend(&schema)?;
        Ok(DynamicModel::new(schema, backend, self.registry.clone()))
    }

    pub fn load_model(&self, ctype: &str, uuid: &str) -> Result<Option<DynamicModel>> {
        let schema = self.schema(ctype)?;
        let backend = self.backend(&schema)?;
        DynamicModel::load(schema, backend, self.registry.clone(), uuid)
    }

    pub fn flush_cache(&self, ctype: &str) {
        self.cache.flush(ctype);
    }

    /// Drop every cached listing and re-read schemas and model descriptors.
    pub fn flush_all_caches(&self) -> Result<()> {
        self.cache.flush_all();
        self.schemas.clear();
        self.resolver.refresh()
    }

    pub fn resolve_slug(&self, slug: &str) -> Result<Option<SlugTarget>> {
        self.storage.file_store().slugs().resolve(slug)
    }
}

impl std::fmt::Debug for Crelish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crelish")
            .field("content_root", &self.config.content_root)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::processors::{FieldContext, FieldProcessor};
    use crate::error::Result;
    use crate::test_utils::TestEnv;
    use serde_json::{json, Value};

    struct Shout;

    impl FieldProcessor for Shout {
        fn process_data(&self, _ctx: &FieldContext<'_>, value: Value) -> Result<Value> {
            Ok(match value {
                Value::String(s) => Value::String(s.to_uppercase()),
                other => other,
            })
        }
    }

    #[test]
    fn backends_are_chosen_per_schema() {
        let env = TestEnv::new();
        let event = env.crelish.schema("event").unwrap();
        let article = env.crelish.schema("article").unwrap();
        assert_eq!(env.crelish.backend(&event).unwrap().mode(), crate::schema::StorageMode::File);
        assert_eq!(
            env.crelish.backend(&article).unwrap().mode(),
            crate::schema::StorageMode::Relational
        );
    }

    #[test]
    fn slugs_resolve_to_their_record() {
        let env = TestEnv::new();
        let mut model = env.crelish.model("event").unwrap();
        model.set("title", "Summer Party");
        let record = model.try_save().unwrap();

        let target = env.crelish.resolve_slug("summer-party").unwrap().unwrap();
        assert_eq!(target.ctype, "event");
        assert_eq!(Some(target.uuid.as_str()), record.uuid());
    }

    #[test]
    fn custom_registry_is_used_for_reads() {
        let mut registry = crate::processors::ProcessorRegistry::with_builtins();
        registry.register_widget("widget_shout", Shout);
        let env = TestEnv::with_registry(registry);
        env.write_schema(
            "note",
            r#"{"fields": [{"key": "body", "type": "widget_shout"}]}"#,
        );

        let mut model = env.crelish.model("note").unwrap();
        model.set("body", "hello");
        let record = model.try_save().unwrap();
        assert_eq!(record.get("body"), Some(&json!("HELLO")));
    }

    #[test]
    fn flush_all_drops_cached_listings() {
        let env = TestEnv::new();
        env.crelish.data("event").unwrap().all().unwrap();
        env.crelish.data("event").unwrap().all().unwrap();
        assert_eq!(env.file_store().scan_count(), 1);

        env.crelish.flush_all_caches().unwrap();
        env.crelish.data("event").unwrap().all().unwrap();
        assert_eq!(env.file_store().scan_count(), 2);
    }
}
